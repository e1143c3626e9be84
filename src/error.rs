//! Common error types for the try-on service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::model::LoadError;

/// Message returned whenever the model cannot serve a request yet
pub const NOT_LOADED_MESSAGE: &str = "Model not loaded yet";

/// Message returned for missing request images
pub const MISSING_INPUT_MESSAGE: &str = "Missing 'person' or 'cloth' in input.";

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("{0}")]
    Validation(String),

    #[error("Invalid image payload: {0}")]
    Decode(String),

    #[error("Model load failed: {0}")]
    ModelLoad(LoadError),

    #[error("Model not ready")]
    NotReady(Option<String>),

    #[error("Inference failed: {0}")]
    InferenceExecution(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error category reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ValidationError,
    DecodeError,
    ModelLoadError,
    NotReady,
    InferenceError,
    ServerError,
}

impl AppError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Validation(_) => ErrorCategory::ValidationError,
            AppError::Decode(_) => ErrorCategory::DecodeError,
            AppError::ModelLoad(_) => ErrorCategory::ModelLoadError,
            AppError::NotReady(_) => ErrorCategory::NotReady,
            AppError::InferenceExecution(_) => ErrorCategory::InferenceError,
            _ => ErrorCategory::ServerError,
        }
    }

    /// Message safe to hand to a client.
    ///
    /// Execution and server failures are reported opaquely; their full text
    /// only goes to the log.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::Decode(_) => self.to_string(),
            AppError::ModelLoad(_) | AppError::NotReady(_) => NOT_LOADED_MESSAGE.to_string(),
            AppError::InferenceExecution(_) => "Inference failed".to_string(),
            _ => "Internal server error".to_string(),
        }
    }

    /// Extra context attached to not-ready style responses
    pub fn details(&self) -> Option<String> {
        match self {
            AppError::ModelLoad(err) => Some(err.to_string()),
            AppError::NotReady(details) => details.clone(),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.category() {
            ErrorCategory::ValidationError | ErrorCategory::DecodeError => StatusCode::BAD_REQUEST,
            ErrorCategory::ModelLoadError | ErrorCategory::NotReady => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCategory::InferenceError | ErrorCategory::ServerError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
    pub r#type: ErrorCategory,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        Self {
            error: err.client_message(),
            details: err.details(),
            r#type: err.category(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse::from(&self));
        (self.status_code(), body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
