//! Application error types and handling
//!
//! Unified error handling for the survey runtime. All errors convert to HTTP
//! responses with a consistent JSON shape; validation failures additionally
//! carry the per-question violation list.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::validator::Violation;

/// Consistent JSON error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "validation_error", "overquota")
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Typed admission/termination reason, when one applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Per-question violations for validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<Violation>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            reason: None,
            violations: None,
        }
    }
}

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection error: {0}")]
    DatabaseConnection(String),

    // Redis errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // Configuration errors: fatal per request, never retried
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Survey configuration error: {0}")]
    SurveyConfiguration(String),

    // Admission rejections carry a typed reason the client may render
    #[error("Admission rejected: {0}")]
    AdmissionRejected(crate::engine::AdmissionRejection),

    // Validation failures carry the violation list
    #[error("Validation failed")]
    ValidationFailed(Vec<Violation>),

    // Quota exhaustion; the session has been terminated with OVERQUOTA
    #[error("Quota exhausted")]
    Overquota,

    // Session state errors
    #[error("{0} not found")]
    NotFound(String),

    #[error("Session is not in progress")]
    SessionNotInProgress,

    #[error("Session can no longer be resumed")]
    SessionExpired,

    // Concurrency conflicts that survived bounded retry
    #[error("Conflict: {0}")]
    Conflict(String),

    // Request errors
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Rate limiting
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    // External side effects; never fail the user-visible response path
    #[error("Email service error: {0}")]
    EmailService(String),

    #[error("External service unavailable: {0}")]
    ExternalServiceUnavailable(String),

    // HTTP client errors
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic anyhow wrapper for unexpected errors
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "database_error",
            Self::DatabaseConnection(_) => "database_connection_error",
            Self::Redis(_) => "redis_error",
            Self::Configuration(_) => "configuration_error",
            Self::SurveyConfiguration(_) => "survey_configuration_error",
            Self::AdmissionRejected(_) => "admission_rejected",
            Self::ValidationFailed(_) => "validation_error",
            Self::Overquota => "overquota",
            Self::NotFound(_) => "not_found",
            Self::SessionNotInProgress => "session_not_in_progress",
            Self::SessionExpired => "session_expired",
            Self::Conflict(_) => "conflict",
            Self::BadRequest(_) => "bad_request",
            Self::InvalidInput(_) => "invalid_input",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::EmailService(_) => "email_service_error",
            Self::ExternalServiceUnavailable(_) => "external_service_unavailable",
            Self::HttpRequest(_) => "http_request_error",
            Self::Internal(_) => "internal_error",
            Self::Serialization(_) => "serialization_error",
            Self::Anyhow(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DatabaseConnection(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Redis(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // Broken survey configuration is a server fault, not the
            // respondent's
            Self::Configuration(_) | Self::SurveyConfiguration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::AdmissionRejected(_) => StatusCode::FORBIDDEN,
            Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            Self::Overquota => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionNotInProgress => StatusCode::BAD_REQUEST,
            Self::SessionExpired => StatusCode::GONE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::EmailService(_) => StatusCode::BAD_GATEWAY,
            Self::ExternalServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::HttpRequest(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) | Self::Serialization(_) | Self::Anyhow(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Create a user-facing message (hides internal details)
    pub fn user_message(&self) -> String {
        match self {
            Self::Database(_) | Self::DatabaseConnection(_) => {
                "A database error occurred".to_string()
            }
            Self::Redis(_) => "A cache error occurred".to_string(),
            Self::Configuration(_) | Self::SurveyConfiguration(_) => {
                "The survey is not correctly configured".to_string()
            }
            Self::AdmissionRejected(reason) => {
                format!("You cannot start this survey: {}", reason.as_str())
            }
            Self::ValidationFailed(_) => "Some answers are invalid".to_string(),
            Self::Overquota => "The survey is full for your answer profile".to_string(),
            Self::NotFound(resource) => format!("{} not found", resource),
            Self::SessionNotInProgress => "This session is not in progress".to_string(),
            Self::SessionExpired => "This session can no longer be resumed".to_string(),
            Self::Conflict(msg) => msg.clone(),
            Self::BadRequest(msg) | Self::InvalidInput(msg) => msg.clone(),
            Self::RateLimitExceeded => "Too many requests, please try again later".to_string(),
            Self::EmailService(_) => "Email service temporarily unavailable".to_string(),
            Self::ExternalServiceUnavailable(service) => {
                format!("{} is temporarily unavailable", service)
            }
            Self::HttpRequest(_) => "External service error".to_string(),
            Self::Internal(_) | Self::Serialization(_) | Self::Anyhow(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(
            error_code = self.error_code(),
            status = %self.status_code(),
            details = %self,
            "Request error"
        );

        let status = self.status_code();
        let mut body = ErrorResponse::new(self.error_code(), self.user_message());
        match &self {
            AppError::ValidationFailed(violations) => {
                body.violations = Some(violations.clone());
            }
            AppError::AdmissionRejected(reason) => {
                body.reason = Some(reason.as_str().to_string());
            }
            AppError::Overquota => {
                body.reason = Some("OVERQUOTA".to_string());
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Helper trait for converting Option to AppError::NotFound
pub trait OptionExt<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(resource.into()))
    }
}

/// Conversion from serde_json errors
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from validator (request DTO) errors
impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(errors.to_string())
    }
}
