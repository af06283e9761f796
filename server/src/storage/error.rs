use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A store invariant was violated, e.g. two records share one product id.
    /// Only an earlier exclusivity bug or an out-of-band write causes this.
    #[error("inconsistent store: {0}")]
    Inconsistent(String),

    #[error("storage backend error: {0}")]
    Backend(#[from] object_store::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        StoreError::InvalidArgument(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
