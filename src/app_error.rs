use std::fmt::{Display, Formatter};

use lmdb::Error as LmdbError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

/// Every failure the facade can surface.
///
/// `ConfigMissing` is only ever reported by init; the handle degrades to
/// the null handle instead of failing. `BackendUnavailable` is what strict
/// storage raises when the handle is null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppError {
    ConfigMissing(Vec<String>),
    BackendUnavailable(String),
    NotFound(String),
    PermissionDenied(String),
    TransportError(String),
    AuthError(String),
    InvalidArgument(String),
    SerializationError(String),
    LocalStoreError(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::ConfigMissing(fields) => {
                write!(f, "Missing configuration: {}", fields.join(", "))
            }
            AppError::BackendUnavailable(msg) => write!(f, "Backend unavailable: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            AppError::TransportError(msg) => write!(f, "Transport error: {}", msg),
            AppError::AuthError(msg) => write!(f, "Auth error: {}", msg),
            AppError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            AppError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppError::LocalStoreError(msg) => write!(f, "Local store error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<SerdeError> for AppError {
    fn from(err: SerdeError) -> Self {
        AppError::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<LmdbError> for AppError {
    fn from(err: LmdbError) -> Self {
        match err {
            LmdbError::NotFound => AppError::NotFound("Key not found in local store".to_string()),
            LmdbError::MapFull => {
                AppError::LocalStoreError("Local store map is full".to_string())
            }
            LmdbError::Corrupted => {
                AppError::LocalStoreError("Local store is corrupted".to_string())
            }
            _ => AppError::LocalStoreError(format!("LMDB error: {:?}", err)),
        }
    }
}

impl AppError {
    /// True for failures caused by the backend being absent or unreachable,
    /// as opposed to the backend answering with a refusal.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            AppError::BackendUnavailable(_) | AppError::TransportError(_)
        )
    }
}
