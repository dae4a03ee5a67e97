use ndarray::{Array2, ArrayView4};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("loading model from {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("unsupported accelerator '{0}' (only 'cpu' is available)")]
    UnsupportedAccelerator(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("model returned shape {found:?} for a batch of {batch}")]
    OutputShape { batch: usize, found: Vec<usize> },
}

/// Maps a batch of NCHW images in `[0, 1]` to one row of non-negative
/// Dirichlet concentrations per image: output shape `(batch, n_answers)`.
///
/// Implementations may be stochastic (dropout left on at inference), which
/// is what makes repeated passes informative.
pub trait ConcentrationModel: Send + Sync {
    fn forward(&self, images: ArrayView4<'_, f32>) -> Result<Array2<f32>, ModelError>;
}

/// Options passed through to the inference runtime.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub accelerator: String,
    /// Intra-op threads; `None` lets the runtime decide.
    pub intra_threads: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            accelerator: "cpu".into(),
            intra_threads: None,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.accelerator.eq_ignore_ascii_case("cpu") {
            Ok(())
        } else {
            Err(ModelError::UnsupportedAccelerator(self.accelerator.clone()))
        }
    }
}
