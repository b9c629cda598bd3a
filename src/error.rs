//! Error types for the affiliate link service
//!
//! Link recognition never surfaces errors (bad URLs are logged and passed
//! through unchanged); everything user-visible funnels through
//! `ScheduleError` and is mapped to an HTTP response by `ApiError`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Storage layer failures (redb transactions and record serialization).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database transaction failed: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("database table access failed: {0}")]
    Table(#[from] redb::TableError),

    #[error("database storage failed: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("database commit failed: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("record serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Failures of the schedule/cancel/list operations.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Input contained no recognizable product link.
    #[error("no product links found in message")]
    NoLinksFound,

    /// Requested publication time is not strictly in the future.
    #[error("scheduled time must be in the future")]
    InvalidTime,

    /// Record missing, owned by another user, or no longer pending.
    /// Deliberately one variant for all three so callers cannot probe
    /// for other users' records.
    #[error("scheduled post not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outbound delivery failures (channel publication).
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("destination rejected message with status {0}")]
    Rejected(u16),
}

/// Startup configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingKey(&'static str),

    #[error("invalid value for environment variable {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// HTTP-facing error wrapper. Maps the domain taxonomy onto the JSON
/// error envelope used by all handlers: `{"error": ..., "code": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Schedule(ScheduleError::Store(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Schedule(ScheduleError::NoLinksFound) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "no_links_found",
                "No product links found to convert".to_string(),
            ),
            ApiError::Schedule(ScheduleError::InvalidTime) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_time",
                "Scheduled time must be in the future".to_string(),
            ),
            ApiError::Schedule(ScheduleError::NotFound) => (
                StatusCode::NOT_FOUND,
                "not_found",
                "Scheduled post not found".to_string(),
            ),
            ApiError::Schedule(ScheduleError::Store(err)) => {
                tracing::error!(error = %err, "storage failure while serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error".to_string(),
                )
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "internal failure while serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(json!({
                "error": message,
                "code": code
            })),
        )
            .into_response()
    }
}
