//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tracing::error;

use crate::config::ConfigError;
use storyflow_core::ports::PortError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents an error related to the WebSocket connection.
    #[error("WebSocket Error: {0}")]
    Websocket(#[from] axum::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Represents a malformed request the client can correct.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Represents a request that is valid but cannot proceed in the
    /// resource's current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    /// Maps the error to an HTTP status and a stable machine-readable code.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Port(PortError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Port(PortError::Unauthorized) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            // The client reacts to this code by opening the API-key modal.
            ApiError::Port(PortError::MissingApiKey(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "api_key_missing")
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            error!("Request failed: {:?}", self);
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
