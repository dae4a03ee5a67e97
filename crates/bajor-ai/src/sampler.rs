//! Multi-pass stochastic inference over a batched catalog.
//!
//! One pass runs the model over every batch in order and concatenates the
//! outputs into a `(galaxies, answers)` matrix. `n_samples` passes are stacked
//! along a trailing axis into the `(galaxies, answers, samples)` tensor.

use std::sync::Arc;

use bajor_core::{Event, Observer};
use bajor_data::{Batch, BatchLoader, DataError, LabelStrategy};
use ndarray::{Array2, Array3, s};
use serde::Deserialize;
use thiserror::Error;

use crate::model::{ConcentrationModel, ModelError};

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("n_samples must be at least 1")]
    NoSamples,

    #[error("catalog is empty")]
    EmptyCatalog,

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("model produced {found} answers but {expected} answer columns were given")]
    AnswerCount { expected: usize, found: usize },

    #[error("batch starting at row {row} produced {found:?}, expected ({rows}, {n_answers})")]
    OutputShape {
        row: usize,
        rows: usize,
        n_answers: usize,
        found: Vec<usize>,
    },
}

/// Ordered batches covering `n_rows` catalog rows.
pub trait BatchSource {
    fn n_rows(&self) -> usize;
    fn n_batches(&self) -> usize;
    fn load(&self, batch: usize) -> Result<Batch, DataError>;
}

impl<L: LabelStrategy> BatchSource for BatchLoader<L> {
    fn n_rows(&self) -> usize {
        self.n_samples()
    }

    fn n_batches(&self) -> usize {
        self.len()
    }

    fn load(&self, batch: usize) -> Result<Batch, DataError> {
        self.batch(batch)
    }
}

/// How the sample axis is filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleMode {
    /// Every sample is its own pass: images are re-fetched and the model is
    /// re-run, so stochastic layers get fresh draws.
    #[default]
    Independent,
    /// One pass, copied into every sample slot. Matches older prediction
    /// files where all samples of a galaxy are identical.
    Replicate,
}

impl std::str::FromStr for SampleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "independent" => Ok(Self::Independent),
            "replicate" => Ok(Self::Replicate),
            other => Err(format!(
                "unknown sample mode '{other}' (expected 'independent' or 'replicate')"
            )),
        }
    }
}

pub struct StochasticSampler {
    n_samples: usize,
    mode: SampleMode,
    n_answers: Option<usize>,
    observer: Arc<dyn Observer>,
}

impl StochasticSampler {
    pub fn new(
        n_samples: usize,
        mode: SampleMode,
        observer: Arc<dyn Observer>,
    ) -> Result<Self, SampleError> {
        if n_samples == 0 {
            return Err(SampleError::NoSamples);
        }
        Ok(Self {
            n_samples,
            mode,
            n_answers: None,
            observer,
        })
    }

    /// Require the model to produce exactly `n` answers. Checked on the
    /// first batch, before any further images are fetched.
    pub fn with_answers(mut self, n: usize) -> Self {
        self.n_answers = Some(n);
        self
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn mode(&self) -> SampleMode {
        self.mode
    }

    /// Produce the `(galaxies, answers, samples)` tensor. Row `i` is catalog
    /// row `i`. Any failed batch aborts the whole run.
    pub fn run(
        &self,
        model: &dyn ConcentrationModel,
        source: &dyn BatchSource,
    ) -> Result<Array3<f32>, SampleError> {
        let n_rows = source.n_rows();
        if n_rows == 0 {
            return Err(SampleError::EmptyCatalog);
        }

        let n_passes = match self.mode {
            SampleMode::Independent => self.n_samples,
            SampleMode::Replicate => 1,
        };

        let mut stacked: Option<Array3<f32>> = None;
        for pass in 0..n_passes {
            let predictions = self.one_pass(model, source)?;
            self.observer.event(&Event::PassComplete {
                pass: pass + 1,
                n_passes,
                n_galaxies: n_rows,
            });

            let out = stacked.get_or_insert_with(|| {
                Array3::zeros((n_rows, predictions.ncols(), self.n_samples))
            });
            if predictions.ncols() != out.shape()[1] {
                return Err(SampleError::OutputShape {
                    row: 0,
                    rows: n_rows,
                    n_answers: out.shape()[1],
                    found: predictions.shape().to_vec(),
                });
            }
            match self.mode {
                SampleMode::Independent => out.slice_mut(s![.., .., pass]).assign(&predictions),
                SampleMode::Replicate => {
                    for k in 0..self.n_samples {
                        out.slice_mut(s![.., .., k]).assign(&predictions);
                    }
                }
            }
        }

        stacked.ok_or(SampleError::EmptyCatalog)
    }

    fn one_pass(
        &self,
        model: &dyn ConcentrationModel,
        source: &dyn BatchSource,
    ) -> Result<Array2<f32>, SampleError> {
        let n_rows = source.n_rows();
        let mut out: Option<Array2<f32>> = None;
        let mut covered = 0;

        for b in 0..source.n_batches() {
            let batch = source.load(b)?;
            let rows = batch.len();
            let concentrations = model.forward(batch.images.view())?;
            if let Some(expected) = self.n_answers
                && concentrations.ncols() != expected
            {
                return Err(SampleError::AnswerCount {
                    expected,
                    found: concentrations.ncols(),
                });
            }
            let start = batch.indices.start;

            let matrix =
                out.get_or_insert_with(|| Array2::zeros((n_rows, concentrations.ncols())));
            let n_answers = matrix.ncols();
            if concentrations.dim() != (rows, n_answers) || batch.indices.end > n_rows {
                return Err(SampleError::OutputShape {
                    row: start,
                    rows,
                    n_answers,
                    found: concentrations.shape().to_vec(),
                });
            }
            matrix
                .slice_mut(s![batch.indices.clone(), ..])
                .assign(&concentrations);
            covered += rows;
            tracing::debug!(batch = b, rows, "batch predicted");
        }

        match out {
            Some(matrix) if covered == n_rows => Ok(matrix),
            _ => Err(SampleError::EmptyCatalog),
        }
    }
}
