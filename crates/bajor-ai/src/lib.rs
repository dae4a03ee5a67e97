//! Inference layer: the model boundary, ONNX Runtime backend, multi-pass
//! stochastic sampling, and Dirichlet post-processing of concentrations.

pub mod dirichlet;
mod model;
#[cfg(feature = "onnx")]
mod onnx;
pub mod sampler;

pub use dirichlet::{
    AnswerSummary, StatsError, expectation_of_answer, expectation_per_sample, summarise,
    variance_of_answer, variance_per_sample,
};
pub use model::{ConcentrationModel, ModelError, RuntimeConfig};
#[cfg(feature = "onnx")]
pub use onnx::OnnxModel;
pub use sampler::{BatchSource, SampleError, SampleMode, StochasticSampler};
