use crate::{
    models::{asset::InvalidAssetId, size_request::SizeParseError},
    services::{
        asset_repository::MetadataError, layout_manager::LayoutError, object_store::StorageError,
    },
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ObjectNotFound { .. } => AppError::not_found(err.to_string()),
            StorageError::InvalidBucketName { .. } | StorageError::InvalidObjectKey => {
                AppError::bad_request(err.to_string())
            }
            StorageError::Unavailable(_) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            StorageError::Sqlx(_) | StorageError::Io(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<LayoutError> for AppError {
    fn from(err: LayoutError) -> Self {
        match err {
            LayoutError::Storage(inner) => inner.into(),
            LayoutError::Metadata(inner) => inner.into(),
            LayoutError::LockTimeout(_) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            LayoutError::Cancelled => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            LayoutError::Serialize(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<SizeParseError> for AppError {
    fn from(err: SizeParseError) -> Self {
        AppError::bad_request(err.to_string())
    }
}

impl From<InvalidAssetId> for AppError {
    fn from(err: InvalidAssetId) -> Self {
        AppError::bad_request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_statuses() {
        let missing: AppError = StorageError::ObjectNotFound {
            bucket: "thumbs".into(),
            key: "k".into(),
        }
        .into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let invalid: AppError = StorageError::InvalidObjectKey.into();
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);

        let down: AppError = LayoutError::Storage(StorageError::Unavailable("x".into())).into();
        assert_eq!(down.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn size_errors_are_bad_requests() {
        let err: AppError = SizeParseError::Empty.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
