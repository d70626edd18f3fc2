//! Error types for the Archivist server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::storage::B2Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
///
/// Responses are plain text and never carry backend detail; the handler
/// logs the full error with the request id.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large: more than {max} bytes")]
    PayloadTooLarge { max: usize },

    #[error("Failed to read request body: {0}")]
    Body(String),

    #[error("Upload failed: {0}")]
    Upload(#[from] B2Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Body(_) | AppError::Upload(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::BadRequest(msg) => msg.clone(),
            AppError::PayloadTooLarge { .. } => "payload too large".to_string(),
            AppError::Body(_) | AppError::Upload(_) => "internal server error".to_string(),
        };

        (status, message).into_response()
    }
}
