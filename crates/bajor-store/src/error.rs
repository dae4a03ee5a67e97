use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported catalog format: {0} (expected .csv or .parquet)")]
    UnsupportedCatalog(PathBuf),

    #[error("{0} requested but this build has no HDF5 support (enable the `hdf5` feature)")]
    Hdf5Disabled(PathBuf),

    #[error("prediction tensor {shape:?} does not match {n_ids} ids and {n_labels} label columns")]
    ShapeMismatch {
        shape: [usize; 3],
        n_ids: usize,
        n_labels: usize,
    },

    #[error("malformed prediction file: {0}")]
    Malformed(String),

    #[error(transparent)]
    Catalog(#[from] bajor_core::CatalogError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[cfg(feature = "hdf5")]
    #[error("hdf5 error: {0}")]
    Hdf5(#[from] ::hdf5::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
