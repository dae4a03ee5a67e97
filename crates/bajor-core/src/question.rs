//! Decision-tree questions and their answer columns.
//!
//! Each question owns a contiguous, inclusive range of columns in the
//! prediction tensor. Only columns inside a declared range can be read as
//! Dirichlet components.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuestionError {
    #[error("question range [{start}, {end}] is empty or reversed")]
    EmptyRange { start: usize, end: usize },
    #[error("answer column {answer} outside question range [{start}, {end}]")]
    AnswerOutsideQuestion {
        answer: usize,
        start: usize,
        end: usize,
    },
    #[error("question range end {end} exceeds {n_answers} answer columns")]
    RangeOutOfBounds { end: usize, n_answers: usize },
    #[error("unknown answer column '{0}'")]
    UnknownAnswer(String),
}

/// One multiple-choice question: answer columns `start_index..=end_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub start_index: usize,
    pub end_index: usize,
}

impl Question {
    pub fn new(
        name: impl Into<String>,
        start_index: usize,
        end_index: usize,
    ) -> Result<Self, QuestionError> {
        if end_index < start_index {
            return Err(QuestionError::EmptyRange {
                start: start_index,
                end: end_index,
            });
        }
        Ok(Self {
            name: name.into(),
            start_index,
            end_index,
        })
    }

    /// Number of answers to this question.
    pub fn n_answers(&self) -> usize {
        self.end_index - self.start_index + 1
    }

    pub fn contains(&self, answer_index: usize) -> bool {
        (self.start_index..=self.end_index).contains(&answer_index)
    }

    /// Check that `answer_index` belongs to this question and the range fits
    /// inside a tensor with `n_answers` columns.
    pub fn check_answer(&self, answer_index: usize, n_answers: usize) -> Result<(), QuestionError> {
        if self.end_index >= n_answers {
            return Err(QuestionError::RangeOutOfBounds {
                end: self.end_index,
                n_answers,
            });
        }
        if !self.contains(answer_index) {
            return Err(QuestionError::AnswerOutsideQuestion {
                answer: answer_index,
                start: self.start_index,
                end: self.end_index,
            });
        }
        Ok(())
    }
}

/// All questions of a decision tree, derived from ordered answer column names.
#[derive(Debug, Clone, Default)]
pub struct QuestionSet {
    questions: Vec<Question>,
    answer_cols: Vec<String>,
}

impl QuestionSet {
    /// Group consecutive answer columns that share a question prefix.
    ///
    /// Column names follow `<question>_<answer>`, e.g. `smooth-or-featured_smooth`.
    /// The question is the text before the first `_`; a column without `_` is
    /// a single-answer question of its own.
    pub fn from_answer_columns(answer_cols: &[String]) -> Self {
        let mut questions: Vec<Question> = Vec::new();
        for (i, col) in answer_cols.iter().enumerate() {
            let prefix = col.split_once('_').map_or(col.as_str(), |(q, _)| q);
            match questions.last_mut() {
                Some(q) if q.name == prefix && q.end_index + 1 == i => q.end_index = i,
                _ => questions.push(Question {
                    name: prefix.to_string(),
                    start_index: i,
                    end_index: i,
                }),
            }
        }
        Self {
            questions,
            answer_cols: answer_cols.to_vec(),
        }
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn answer_cols(&self) -> &[String] {
        &self.answer_cols
    }

    /// Column index and owning question of a named answer.
    pub fn locate(&self, answer: &str) -> Result<(usize, &Question), QuestionError> {
        let index = self
            .answer_cols
            .iter()
            .position(|c| c == answer)
            .ok_or_else(|| QuestionError::UnknownAnswer(answer.to_string()))?;
        let question = self
            .questions
            .iter()
            .find(|q| q.contains(index))
            .ok_or_else(|| QuestionError::UnknownAnswer(answer.to_string()))?;
        Ok((index, question))
    }
}
