use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unique error codes for client identification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationFailed = 1001,
    PayloadTooLarge = 1002,

    // Ingestion errors (2xxx)
    ExtractionFailed = 2001,

    // External service errors (5xxx)
    EmbeddingFailed = 5001,
    QueryEmbeddingFailed = 5002,
    ProviderUnavailable = 5003,
    ProviderTimeout = 5004,

    // Engine state errors (6xxx)
    NotReady = 6001,

    // Internal errors (9xxx)
    InternalError = 9001,
    ConfigurationError = 9002,
}

impl ErrorCode {
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    // Ingestion errors
    #[error("Document extraction failed: {0}")]
    ExtractionFailed(String),

    // External service errors
    #[error("Embedding request failed: {0}")]
    EmbeddingFailed(String),

    #[error("Query embedding failed: {0}")]
    QueryEmbeddingFailed(String),

    #[error("Completion provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("{service} call timed out after {timeout_secs}s")]
    ProviderTimeout { service: String, timeout_secs: u64 },

    // Engine state errors
    #[error("Engine is not ready to serve queries")]
    NotReady,

    // Internal errors
    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),
}

impl AppError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ValidationError(_) => ErrorCode::ValidationFailed,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::ExtractionFailed(_) => ErrorCode::ExtractionFailed,
            Self::EmbeddingFailed(_) => ErrorCode::EmbeddingFailed,
            Self::QueryEmbeddingFailed(_) => ErrorCode::QueryEmbeddingFailed,
            Self::ProviderUnavailable(_) => ErrorCode::ProviderUnavailable,
            Self::ProviderTimeout { .. } => ErrorCode::ProviderTimeout,
            Self::NotReady => ErrorCode::NotReady,
            Self::InternalError(_) => ErrorCode::InternalError,
            Self::ConfigError(_) => ErrorCode::ConfigurationError,
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ExtractionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::EmbeddingFailed(_) => StatusCode::BAD_GATEWAY,
            Self::QueryEmbeddingFailed(_) => StatusCode::BAD_GATEWAY,
            Self::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::ProviderTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        // Log based on severity
        match &self {
            AppError::ValidationError(_) | AppError::PayloadTooLarge { .. } => {
                tracing::debug!(error_code = error_code.as_u16(), %message, "Client error");
            }
            AppError::NotReady => {
                tracing::info!(error_code = error_code.as_u16(), %message, "Engine not ready");
            }
            _ => {
                tracing::error!(error_code = error_code.as_u16(), %message, error = ?self, "Server error");
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code.as_u16(),
                "status": status.as_u16(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
