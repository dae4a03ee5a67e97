//! Closed-form Dirichlet statistics over predicted concentrations.
//!
//! For a question spanning answer columns `start..=end` and an answer `a` in
//! that range, with `alpha_total = sum(alpha[start..=end])`:
//!
//! - expectation: `alpha[a] / alpha_total`
//! - variance: `alpha[a] * (alpha_total - alpha[a]) / (alpha_total^2 * (alpha_total + 1))`
//!
//! Callers must keep `alpha_total > 0`; zero totals give NaN.

use bajor_core::{Question, QuestionError};
use ndarray::{Array1, Array2, ArrayView2, ArrayView3, Axis, NdFloat, Zip, s};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatsError {
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error("prediction tensor has no samples")]
    NoSamples,
}

fn alphas<A: NdFloat>(
    predictions: ArrayView2<'_, A>,
    question: &Question,
    answer_index: usize,
) -> Result<(Array1<A>, Array1<A>), StatsError> {
    question.check_answer(answer_index, predictions.ncols())?;
    let total = predictions
        .slice(s![.., question.start_index..=question.end_index])
        .sum_axis(Axis(1));
    let answer = predictions.column(answer_index).to_owned();
    Ok((total, answer))
}

/// Mean vote fraction of `answer_index`, one value per galaxy.
pub fn expectation_of_answer<A: NdFloat>(
    predictions: ArrayView2<'_, A>,
    question: &Question,
    answer_index: usize,
) -> Result<Array1<A>, StatsError> {
    let (total, answer) = alphas(predictions, question, answer_index)?;
    Ok(Zip::from(&answer)
        .and(&total)
        .map_collect(|&a, &t| a / t))
}

/// Variance of the vote fraction of `answer_index`, one value per galaxy.
pub fn variance_of_answer<A: NdFloat>(
    predictions: ArrayView2<'_, A>,
    question: &Question,
    answer_index: usize,
) -> Result<Array1<A>, StatsError> {
    let (total, answer) = alphas(predictions, question, answer_index)?;
    // Factored as e(1-e)/(t+1) so large totals don't overflow t^2.
    Ok(Zip::from(&answer).and(&total).map_collect(|&a, &t| {
        let e = a / t;
        e * ((t - a) / t) / (t + A::one())
    }))
}

fn per_sample<A, F>(
    predictions: ArrayView3<'_, A>,
    question: &Question,
    answer_index: usize,
    stat: F,
) -> Result<Array2<A>, StatsError>
where
    A: NdFloat,
    F: Fn(ArrayView2<'_, A>, &Question, usize) -> Result<Array1<A>, StatsError>,
{
    let (n_galaxies, _, n_samples) = predictions.dim();
    if n_samples == 0 {
        return Err(StatsError::NoSamples);
    }
    let mut out = Array2::zeros((n_galaxies, n_samples));
    for (k, sample) in predictions.axis_iter(Axis(2)).enumerate() {
        out.column_mut(k).assign(&stat(sample, question, answer_index)?);
    }
    Ok(out)
}

/// Expectation for every sample of a `(galaxies, answers, samples)` tensor:
/// shape `(galaxies, samples)`.
pub fn expectation_per_sample<A: NdFloat>(
    predictions: ArrayView3<'_, A>,
    question: &Question,
    answer_index: usize,
) -> Result<Array2<A>, StatsError> {
    per_sample(predictions, question, answer_index, expectation_of_answer::<A>)
}

/// Variance for every sample of a `(galaxies, answers, samples)` tensor.
pub fn variance_per_sample<A: NdFloat>(
    predictions: ArrayView3<'_, A>,
    question: &Question,
    answer_index: usize,
) -> Result<Array2<A>, StatsError> {
    per_sample(predictions, question, answer_index, variance_of_answer::<A>)
}

/// Per-galaxy statistics of one answer, averaged over samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerSummary<A> {
    pub expectation: Array1<A>,
    pub variance: Array1<A>,
}

pub fn summarise<A: NdFloat>(
    predictions: ArrayView3<'_, A>,
    question: &Question,
    answer_index: usize,
) -> Result<AnswerSummary<A>, StatsError> {
    let mean = |m: Array2<A>| -> Result<Array1<A>, StatsError> {
        let n = A::from(m.ncols())
            .filter(|n| *n > A::zero())
            .ok_or(StatsError::NoSamples)?;
        Ok(m.sum_axis(Axis(1)).mapv(|x| x / n))
    };
    Ok(AnswerSummary {
        expectation: mean(expectation_per_sample(predictions, question, answer_index)?)?,
        variance: mean(variance_per_sample(predictions, question, answer_index)?)?,
    })
}
