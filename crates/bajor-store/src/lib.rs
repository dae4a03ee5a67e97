//! Storage layer: catalog files in, prediction tensors out.

mod catalog;
mod error;
#[cfg(feature = "hdf5")]
mod hdf;
mod predictions;

pub use catalog::{read_catalog, read_csv, read_labelled_catalog, read_parquet};
pub use error::StoreError;
pub use predictions::{OutputFormat, PredictionSet, read_predictions, write_predictions};
