//! Error types for llmock

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Result type alias for llmock operations
pub type MockResult<T> = Result<T, MockError>;

/// Main error type for the mock server
#[derive(Error, Debug, Clone)]
pub enum MockError {
    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid regex pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    // Client input errors
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("{0} array is required and must not be empty")]
    EmptyMessages(&'static str),

    #[error("no messages provided")]
    NoMessages,

    #[error("validation error: {0}")]
    Validation(String),

    // Internal
    #[error("internal error: {0}")]
    Internal(String),
}

impl MockError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidPattern { .. }
            | Self::InvalidJson(_)
            | Self::EmptyMessages(_)
            | Self::NoMessages
            | Self::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Internal(_) => "server_error",
            _ => "invalid_request_error",
        }
    }
}

/// The wire format a response should use for error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFlavor {
    OpenAi,
    Anthropic,
    Gemini,
}

/// OpenAI-style error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error: ErrorDetail {
                message: message.to_string(),
                error_type: error_type.to_string(),
            },
        }
    }
}

/// Write an error body in the given protocol's native shape.
pub fn protocol_error(flavor: ApiFlavor, status: StatusCode, error_type: &str, message: &str) -> Response {
    let body = match flavor {
        ApiFlavor::OpenAi => json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": null,
            }
        }),
        ApiFlavor::Anthropic => json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": message,
            }
        }),
        ApiFlavor::Gemini => json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
                "status": status.canonical_reason().unwrap_or(""),
            }
        }),
    };
    (status, Json(body)).into_response()
}

impl MockError {
    /// Render this error in a specific protocol's error shape.
    pub fn into_protocol_response(self, flavor: ApiFlavor) -> Response {
        protocol_error(flavor, self.status_code(), self.error_type(), &self.to_string())
    }
}

impl IntoResponse for MockError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse::new(self.error_type(), &self.to_string()));
        (status, body).into_response()
    }
}

impl From<serde_json::Error> for MockError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidJson(err.to_string())
    }
}

impl From<std::io::Error> for MockError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
