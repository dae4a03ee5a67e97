use bajor_fetch::FetchError;
use thiserror::Error;

use crate::decode::DecodeError;
use crate::module::Stage;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("data module was not set up for stage '{stage}'")]
    NotSetUp { stage: Stage },

    #[error("no catalog supplied for stage '{stage}'")]
    MissingCatalog { stage: Stage },

    #[error("stage '{stage}' cannot be set up while a '{other}' catalog is supplied")]
    UnrelatedCatalog { stage: Stage, other: Stage },

    #[error("sample index {index} out of range for catalog of {len} rows")]
    IndexOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("sample {index} has shape {found:?}, batch expects {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("invalid loader configuration: {0}")]
    InvalidConfig(String),

    #[error("worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
