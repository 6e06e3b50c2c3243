use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

use crate::app_error::CoreError;

/// Envelope returned as JSON by every C ABI entry point.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum AppResponse {
    DatabaseError(String),
    SerializationError(String),
    NotFound(String),
    TransportError(String),
    ValidationError(String),
    BadRequest(String),
    Ok(String),
}

impl Display for AppResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppResponse::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppResponse::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppResponse::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppResponse::TransportError(msg) => write!(f, "Transport error: {}", msg),
            AppResponse::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppResponse::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            AppResponse::Ok(msg) => write!(f, "Ok: {}", msg),
        }
    }
}

impl From<CoreError> for AppResponse {
    fn from(err: CoreError) -> Self {
        let msg = err.to_string();
        match err {
            CoreError::StorageUnavailable
            | CoreError::StorageWriteFailed(_)
            | CoreError::StorageReadFailed(_) => AppResponse::DatabaseError(msg),
            CoreError::NotFound { .. } => AppResponse::NotFound(msg),
            CoreError::Transport(_) | CoreError::HttpStatus { .. } => AppResponse::TransportError(msg),
            CoreError::Serialization(_) => AppResponse::SerializationError(msg),
            CoreError::InvalidReview(_) => AppResponse::ValidationError(msg),
            CoreError::Config(_) => AppResponse::BadRequest(msg),
        }
    }
}

impl From<SerdeError> for AppResponse {
    fn from(err: SerdeError) -> Self {
        AppResponse::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl AppResponse {
    pub fn success(msg: impl Into<String>) -> Self {
        AppResponse::Ok(msg.into())
    }

    /// Serializes `value` into an `Ok` payload.
    pub fn ok_json<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(json) => AppResponse::Ok(json),
            Err(e) => AppResponse::from(e),
        }
    }

    pub fn from_result<T: Serialize>(result: Result<T, CoreError>) -> Self {
        match result {
            Ok(value) => AppResponse::ok_json(&value),
            Err(e) => AppResponse::from(e),
        }
    }
}
