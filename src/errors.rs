use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

use crate::{client::BucketError, services::local_store::LocalStoreError};

/// Failures surfaced by `Storage`, `Target` and the maintenance passes.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Invalid options, missing bucket, missing credential material.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An object that had to exist is absent.
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },

    #[error("provider error for `{bucket}/{key}`: {source}")]
    Provider {
        bucket: String,
        key: String,
        #[source]
        source: BucketError,
    },

    /// Source and destination resolve to the same object, or similar.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Staging content into a temporary file failed.
    #[error("import failed: {message}")]
    Import {
        message: String,
        #[source]
        source: io::Error,
    },

    #[error("could not update metadata of resource {sha1} ({filename}): {source}")]
    MetadataUpdate {
        sha1: String,
        filename: String,
        #[source]
        source: BucketError,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConnectorError {
    /// Wrap a provider failure with its bucket/key context, keeping
    /// bucket-level misconfiguration and not-found distinguishable.
    pub fn from_bucket(bucket: &str, key: &str, err: BucketError) -> Self {
        match err {
            BucketError::BucketNotFound(name) => {
                ConnectorError::Configuration(format!("bucket `{}` does not exist", name))
            }
            BucketError::ObjectNotFound { bucket, key } => ConnectorError::NotFound { bucket, key },
            other => ConnectorError::Provider {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: other,
            },
        }
    }

    pub fn import(message: impl Into<String>, source: io::Error) -> Self {
        ConnectorError::Import {
            message: message.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

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

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
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

impl From<LocalStoreError> for AppError {
    fn from(err: LocalStoreError) -> Self {
        match err {
            LocalStoreError::BucketNotFound(_) | LocalStoreError::ObjectNotFound { .. } => {
                AppError::not_found(err.to_string())
            }
            LocalStoreError::InvalidObjectKey | LocalStoreError::InvalidBucketName { .. } => {
                AppError::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
