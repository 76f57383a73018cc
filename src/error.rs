use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// The connection pool could not be built.
    #[error("Pool configuration error: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    /// An outbound HTTP error.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON encoding or decoding error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] sonic_rs::Error),

    /// A column was missing or had an unexpected type.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// The subscription ledger could not be read or written.
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// A payment notification that can never be processed.
    #[error("Malformed webhook: {0}")]
    MalformedWebhook(String),

    /// The checkout provider refused or failed to create a payment.
    #[error("Checkout error: {0}")]
    Checkout(String),

    /// An authorization error.
    #[error("Authorization failed")]
    Unauthorized,

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A rate limit exceeded error.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Collapses a storage-level failure into `LedgerUnavailable`.
    ///
    /// Errors that are already domain errors pass through untouched.
    pub fn into_ledger_error(self) -> AppError {
        match self {
            AppError::Database(e) => AppError::LedgerUnavailable(e.to_string()),
            AppError::Pool(e) => AppError::LedgerUnavailable(e.to_string()),
            AppError::MissingData(column) => {
                AppError::LedgerUnavailable(format!("unreadable column {}", column))
            }
            other => other,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Database unavailable".to_string())
            }

            AppError::CreatePool(ref e) => {
                tracing::error!("Pool configuration error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Http(ref e) => {
                tracing::error!("HTTP client error: {}", e);
                (StatusCode::BAD_GATEWAY, "Upstream error".to_string())
            }

            AppError::Serialization(ref e) => {
                tracing::debug!("Serialization error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON".to_string())
            }

            AppError::MissingData(ref column) => {
                tracing::error!("Missing data: {}", column);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::LedgerUnavailable(ref msg) => {
                tracing::error!("Ledger unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Ledger unavailable".to_string())
            }

            AppError::MalformedWebhook(ref msg) => {
                tracing::warn!("Malformed webhook: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Checkout(ref msg) => {
                tracing::error!("Checkout error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Checkout unavailable".to_string())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::RateLimitExceeded(ref msg) => {
                tracing::warn!("Rate limit exceeded: {}", msg);
                (StatusCode::TOO_MANY_REQUESTS, msg.clone())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}

/// Why a finished job did not produce an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The provider rejected the prompt or image as sensitive content.
    Flagged,
    /// Any other provider-side failure.
    Generic,
}

/// Errors produced by the generation job client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The request was rejected before reaching the provider.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The provider could not be reached or refused the submission.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The job reached a terminal failure on the provider side.
    #[error("Generation failed: {message}")]
    Generation { message: String, kind: FailureKind },

    /// The job did not finish before the deadline.
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    /// The session that owned the job moved on.
    #[error("Generation cancelled")]
    Cancelled,
}
