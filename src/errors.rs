// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Outcome of a failed OTP check. Messages are shown to the caller verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtpError {
    #[error("No verification code found. Please request a new one.")]
    NotFound,

    #[error("Verification code has expired. Please request a new one.")]
    Expired,

    #[error("Too many failed attempts. Please request a new code.")]
    AttemptsExhausted,

    #[error("{}", mismatch_message(.remaining))]
    Mismatch { remaining: u32 },
}

fn mismatch_message(remaining: &u32) -> String {
    match *remaining {
        0 => "Invalid verification code. No attempts remaining. Please request a new code.".to_string(),
        1 => "Invalid verification code. 1 attempt remaining.".to_string(),
        n => format!("Invalid verification code. {} attempts remaining.", n),
    }
}

/// Email provider failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The provider refused the sender domain; needs operator action, retrying won't help.
    #[error("Email domain not verified: {0}")]
    DomainNotVerified(String),

    #[error("Failed to send verification email: {0}")]
    Provider(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Otp(#[from] OtpError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("Email verification required.")]
    VerificationRequired,

    #[error("Please register with your organization email address. Personal email providers are not allowed.")]
    PersonalEmailDomain,

    #[error("{0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Redis error: {0}")]
    RedisError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Otp(OtpError::AttemptsExhausted) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Otp(_) => StatusCode::BAD_REQUEST,
            AppError::Delivery(DeliveryError::DomainNotVerified(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Delivery(DeliveryError::Provider(_)) => StatusCode::BAD_GATEWAY,
            AppError::VerificationRequired => StatusCode::BAD_REQUEST,
            AppError::PersonalEmailDomain => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_)
            | AppError::Migration(_)
            | AppError::RedisError(_)
            | AppError::ConfigurationError(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to the caller. Internal failures are collapsed so
    /// driver and provider details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Database(_)
            | AppError::Migration(_)
            | AppError::RedisError(_)
            | AppError::ConfigurationError(_)
            | AppError::Internal(_) => "Internal server error".to_string(),
            AppError::ValidationError(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::ConfigurationError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    pub fn redis(msg: impl Into<String>) -> Self {
        AppError::RedisError(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "error": self.public_message(),
        }));

        (status, body).into_response()
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::RedisError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(msg) => msg.to_string(),
                    None => format!("Invalid value for {}", field),
                })
            })
            .collect();
        messages.sort();
        AppError::ValidationError(messages.join("; "))
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("Password hashing failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
