use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::engine::SttyError;
use crate::uart::UartError;

/// A specialized `Result` type for the HTTP glue handlers.
pub type AppResult<T> = Result<T, AppError>;

/// Unified application error type.
///
/// The engine itself reports failures through its own module-level error
/// enums; this type exists so the glue layer (HTTP handlers, startup) can
/// funnel them into one place and map them onto HTTP responses.
#[derive(Debug)]
pub enum AppError {
    InvalidPayload(String),
    Stty(SttyError),
    Uart(UartError),
    EngineGone,
    IoError(std::io::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPayload(details) => {
                write!(f, "The request payload is invalid: {details}")
            }
            Self::Stty(e) => write!(f, "Invalid input in JSON: {e}"),
            Self::Uart(e) => write!(f, "A UART error occurred: {e}"),
            Self::EngineGone => write!(f, "The bridge engine is no longer running."),
            Self::IoError(e) => write!(f, "An I/O error occurred: {e}"),
        }
    }
}

impl std::error::Error for AppError {}

/// Allows Axum to convert `AppError` into an HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, error_message) = match self {
            Self::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "InvalidPayload", self.to_string()),
            Self::Stty(_) => (StatusCode::BAD_REQUEST, "InvalidConfiguration", self.to_string()),
            Self::Uart(_) => (StatusCode::INTERNAL_SERVER_ERROR, "UartError", self.to_string()),
            Self::EngineGone => (StatusCode::SERVICE_UNAVAILABLE, "EngineGone", self.to_string()),
            Self::IoError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IoError", self.to_string()),
        };

        let body = axum::Json(json!({
            "status": "error",
            "error": { "type": error_type, "message": error_message }
        }));
        (status, body).into_response()
    }
}

// Implement `From` conversions to allow the `?` operator to work seamlessly.
impl From<SttyError> for AppError {
    fn from(err: SttyError) -> Self {
        AppError::Stty(err)
    }
}

impl From<UartError> for AppError {
    fn from(err: UartError) -> Self {
        AppError::Uart(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err)
    }
}
