//! Error taxonomy shared by the store, queue, transport and coordinator layers.

use thiserror::Error;

use crate::local_db_model::Collection;

/// Every failure the core can report.
///
/// `StorageWriteFailed` and `StorageReadFailed` are normally logged at the
/// store boundary and never reach callers of the read path. `NotFound` is
/// distinct from the transport variants so a lookup miss can never be
/// mistaken for an outage.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("persistent storage is unavailable on this platform")]
    StorageUnavailable,

    #[error("storage write failed: {0}")]
    StorageWriteFailed(String),

    #[error("storage read failed: {0}")]
    StorageReadFailed(String),

    #[error("no {collection} record with id {id}")]
    NotFound { collection: Collection, id: String },

    #[error("network request failed: {0}")]
    Transport(String),

    #[error("backend answered {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid review: {0}")]
    InvalidReview(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CoreError {
    /// True for failures that mean "the backend could not be reached or
    /// refused the request".
    pub fn is_transport(&self) -> bool {
        matches!(self, CoreError::Transport(_) | CoreError::HttpStatus { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }

    pub(crate) fn write(err: lmdb::Error) -> Self {
        CoreError::StorageWriteFailed(err.to_string())
    }

    pub(crate) fn read(err: lmdb::Error) -> Self {
        CoreError::StorageReadFailed(err.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => CoreError::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => CoreError::Transport(err.to_string()),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
