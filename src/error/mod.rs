//! Error handling for the balancer and its HTTP surface.
//!
//! Every failure in the crate is an [`AppError`]. Errors produced by an
//! upstream call always carry the id of the key that produced them (see
//! [`TaggedUpstreamError`]) so the calling layer can decide on failover.

pub mod types;
pub mod upstream;

pub use upstream::{ErrorClass, TaggedUpstreamError};

use crate::storage::KeyId;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

/// OpenAI-compatible error envelope: `{"error": {...}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
}

/// Main application error type.
#[derive(Error, Debug)]
pub enum AppError {
    // Configuration errors
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String, line: Option<usize> },

    // Storage errors
    #[error("Storage backend unavailable: {message}")]
    StorageUnavailable { message: String },

    #[error("Storage operation failed: {operation} - {message}")]
    Storage { operation: String, message: String },

    #[error("Failed to persist feedback for key {key_id}: {message}")]
    FeedbackPersistence { key_id: KeyId, message: String },

    // Key selection and failover
    #[error("No available API keys")]
    NoAvailableKeys,

    #[error("All failover attempts exhausted after {attempts} attempt(s)")]
    FailoverExhausted { attempts: u32 },

    #[error(transparent)]
    Upstream(#[from] TaggedUpstreamError),

    #[error("Request was cancelled before completion")]
    RequestCancelled,

    // Key lifecycle
    #[error("API key {id} not found")]
    KeyNotFound { id: KeyId },

    #[error("API key already exists")]
    DuplicateKey,

    // Request validation and access
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Validation failed: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Unauthorized")]
    Unauthorized,

    // System errors
    #[error("HTTP client build error: {message}")]
    HttpClientBuild { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("IO operation failed: {operation} - {message}")]
    Io { operation: String, message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn config_validation(message: impl Into<String>, field: Option<impl Into<String>>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
            field: field.map(Into::into),
        }
    }

    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Id of the key that produced this error, if any.
    pub fn key_id(&self) -> Option<KeyId> {
        match self {
            Self::Upstream(tagged) => Some(tagged.key_id),
            Self::FeedbackPersistence { key_id, .. } => Some(*key_id),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigParse { .. }
            | Self::InvalidRequest { .. }
            | Self::Validation { .. }
            | Self::Serialization { .. } => StatusCode::BAD_REQUEST,

            Self::Unauthorized => StatusCode::UNAUTHORIZED,

            Self::KeyNotFound { .. } | Self::ConfigNotFound { .. } => StatusCode::NOT_FOUND,

            Self::DuplicateKey => StatusCode::CONFLICT,

            // Non-standard "client closed request", as used by nginx.
            Self::RequestCancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }

            Self::Upstream(_) => StatusCode::BAD_GATEWAY,

            Self::NoAvailableKeys
            | Self::FailoverExhausted { .. }
            | Self::StorageUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,

            Self::ConfigValidation { .. }
            | Self::Storage { .. }
            | Self::FeedbackPersistence { .. }
            | Self::HttpClientBuild { .. }
            | Self::Io { .. }
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OpenAI-style `type` string for the error body.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. }
            | Self::Validation { .. }
            | Self::Serialization { .. }
            | Self::ConfigParse { .. }
            | Self::KeyNotFound { .. }
            | Self::DuplicateKey => "invalid_request_error",
            Self::Unauthorized => "authentication_error",
            Self::NoAvailableKeys | Self::FailoverExhausted { .. } | Self::StorageUnavailable { .. } => {
                "service_unavailable"
            }
            Self::Upstream(_) => "upstream_error",
            Self::RequestCancelled => "request_cancelled",
            _ => "server_error",
        }
    }

    /// Message shown to clients. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::FailoverExhausted { .. } => "All API keys failed".to_string(),
            Self::NoAvailableKeys => "No available API keys".to_string(),
            Self::Storage { .. }
            | Self::StorageUnavailable { .. }
            | Self::FeedbackPersistence { .. }
            | Self::HttpClientBuild { .. }
            | Self::Io { .. }
            | Self::Internal { .. }
            | Self::ConfigValidation { .. } => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Log the error with a level matching its status class.
    pub fn log(&self, request_id: Option<&str>) {
        let request_id = request_id.unwrap_or("unknown");
        if self.status_code().is_server_error() {
            error!(
                error = %self,
                request_id = request_id,
                error_type = self.error_type(),
                key.id = self.key_id(),
                "Application error occurred"
            );
        } else {
            warn!(
                error = %self,
                request_id = request_id,
                error_type = self.error_type(),
                "Client error occurred"
            );
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log(None);

        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                message: self.public_message(),
                error_type: self.error_type().to_string(),
                code: format!("http_{}", status.as_u16()),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for the application
pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamError;

    #[test]
    fn test_selection_errors_map_to_service_unavailable() {
        assert_eq!(AppError::NoAvailableKeys.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            AppError::FailoverExhausted { attempts: 3 }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_key_id_is_exposed_for_tagged_errors() {
        let tagged = TaggedUpstreamError::new(7, UpstreamError::status(500, "boom"));
        assert_eq!(AppError::from(tagged).key_id(), Some(7));
        assert_eq!(AppError::NoAvailableKeys.key_id(), None);
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = AppError::storage("hset", "connection reset by peer");
        assert_eq!(err.public_message(), "Internal server error");
    }
}
