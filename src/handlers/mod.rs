use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::errors::{AppError, Result};

pub(crate) mod auth;
pub(crate) mod health;
pub(crate) mod otp;

/// Turns a body rejection into the same `{ success, error }` shape as every other failure.
pub(crate) fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::invalid_data(rejection.body_text()))
}
