//! Data layer: remote image decoding, per-sample transforms, and the
//! catalog-backed dataset and batch loader that feed the model.

pub mod dataset;
pub mod decode;
mod error;
pub mod module;
pub mod transform;

pub use dataset::{CatalogDataset, CatalogLabels, LabelStrategy, NoLabels, Sample, TargetTransform};
pub use decode::{DecodeConfig, DecodeError, Decoder, ImageFormat};
pub use error::DataError;
pub use module::{Batch, BatchLoader, DataModule, LoaderConfig, Stage};
pub use transform::{ImageTransform, StandardTransform, TransformConfig, to_chw};
