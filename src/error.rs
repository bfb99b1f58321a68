//! # Error Handling
//!
//! This module defines the service's error type and how each failure is turned into an HTTP
//! response. Every handler returns `AppResult<T>`, so a `?` anywhere in a pipeline ends up here.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: one variant per failure class the protocol distinguishes
//! - **Data**: each variant carries a human-readable message
//! - **Pattern matching**: `match` maps a variant to its status code
//!
//! ### Traits for Error Conversion
//! - **From trait**: lets `?` convert decode, JSON, multipart and config errors automatically
//! - **ResponseError trait**: converts errors to HTTP responses
//! - **Display trait**: defines how errors are formatted as strings
//!
//! ## Failure classes:
//! Validation errors (400/404) are raised before the engine is called. Engine failures (500)
//! keep the engine's status code in the message. In both cases no session state changes.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::audio::DecodeError;
use crate::session::SessionNotFound;

/// Custom error types for the service.
///
/// ## Error Categories:
/// - **EngineNotReady**: no inference engine is loaded (503)
/// - **InvalidAudio**: upload could not be decoded (400)
/// - **AudioTooShort**: chunk below the engine's minimum length (400)
/// - **InvalidRequest**: malformed form fields, JSON or parameters (400)
/// - **SessionNotFound**: unknown or closed streaming session (404)
/// - **EngineFailure**: engine errored, timed out or returned a bad status (500)
/// - **ConfigError**: configuration problems (500)
/// - **Internal**: everything else (500)
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::SessionNotFound(session_id.to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    EngineNotReady(String),
    InvalidAudio(String),
    AudioTooShort(String),
    InvalidRequest(String),
    SessionNotFound(String),
    EngineFailure(String),
    ConfigError(String),
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::EngineNotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InvalidAudio(_) | AppError::AudioTooShort(_) | AppError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::EngineFailure(_) | AppError::ConfigError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error type used in the JSON body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::EngineNotReady(_) => "engine_not_ready",
            AppError::InvalidAudio(_) => "invalid_audio",
            AppError::AudioTooShort(_) => "audio_too_short",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::EngineFailure(_) => "engine_failure",
            AppError::ConfigError(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    fn message(&self) -> &str {
        match self {
            AppError::EngineNotReady(msg)
            | AppError::InvalidAudio(msg)
            | AppError::AudioTooShort(msg)
            | AppError::InvalidRequest(msg)
            | AppError::SessionNotFound(msg)
            | AppError::EngineFailure(msg)
            | AppError::ConfigError(msg)
            | AppError::Internal(msg) => msg,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::EngineNotReady(msg) => write!(f, "Engine not ready: {}", msg),
            AppError::InvalidAudio(msg) => write!(f, "Invalid audio: {}", msg),
            AppError::AudioTooShort(msg) => write!(f, "{}", msg),
            AppError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            AppError::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            AppError::EngineFailure(msg) => write!(f, "{}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Converts errors into JSON responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "audio_too_short",
///     "message": "Audio chunk too short: 800 samples, minimum 1600 samples required",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::SessionNotFound(_) => self.to_string(),
            _ => self.message().to_string(),
        };

        HttpResponse::build(self.status()).json(json!({
            "error": {
                "type": self.kind(),
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// `?` on an `anyhow::Error` becomes an internal error.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<DecodeError> for AppError {
    fn from(err: DecodeError) -> Self {
        AppError::InvalidAudio(err.to_string())
    }
}

impl From<SessionNotFound> for AppError {
    fn from(err: SessionNotFound) -> Self {
        AppError::SessionNotFound(err.0)
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::InvalidRequest(format!("Multipart error: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::EngineNotReady("x".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AppError::InvalidAudio("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::AudioTooShort("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InvalidRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::SessionNotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::EngineFailure("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(AppError::Internal("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_decode_error_is_invalid_audio() {
        let err: AppError = DecodeError::Empty.into();
        assert!(matches!(err, AppError::InvalidAudio(_)));
    }

    #[actix_web::test]
    async fn test_error_body_shape() {
        let err = AppError::AudioTooShort(
            "Audio chunk too short: 800 samples, minimum 1600 samples required".to_string(),
        );
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["type"], "audio_too_short");
        assert_eq!(
            value["error"]["message"],
            "Audio chunk too short: 800 samples, minimum 1600 samples required"
        );
        assert!(value["error"]["timestamp"].is_string());
    }
}
