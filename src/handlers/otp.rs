use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use validator::Validate;

use crate::dtos::otp_dtos::{
    ClearOtpQuery, ClearOtpResponse, IssueOtpRequest, IssueOtpResponse, VerifyOtpRequest,
    VerifyOtpResponse,
};
use crate::errors::{AppError, Result};
use crate::handlers::json_body;
use crate::state::AppState;

// 1. Issue a code and email it
pub async fn issue_otp(
    State(state): State<AppState>,
    payload: std::result::Result<Json<IssueOtpRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = json_body(payload)?;
    req.validate()?;

    let issued = state.otp_service.issue_otp(&req.email).await?;

    // The record is kept on delivery failure; requesting again reissues.
    if let Err(e) = issued.delivery {
        return Err(AppError::Delivery(e));
    }

    let otp = state.config.expose_otp().then(|| issued.record.code.clone());

    Ok((
        StatusCode::OK,
        Json(IssueOtpResponse {
            success: true,
            message: "Verification code sent to your email".to_string(),
            expires_at: issued.record.expires_at,
            otp,
        }),
    ))
}

// 2. Verify a code
pub async fn verify_otp(
    State(state): State<AppState>,
    payload: std::result::Result<Json<VerifyOtpRequest>, JsonRejection>,
) -> Result<Json<VerifyOtpResponse>> {
    let req = json_body(payload)?;
    req.validate()?;

    state.otp_service.verify_and_mark(&req.email, &req.otp).await?;

    Ok(Json(VerifyOtpResponse {
        success: true,
        message: "Email verified successfully".to_string(),
    }))
}

// 3. Debug-only cleanup; mounted only outside production
pub async fn clear_otps(
    State(state): State<AppState>,
    Query(query): Query<ClearOtpQuery>,
) -> Result<Json<ClearOtpResponse>> {
    let email = query.email.as_deref().map(str::trim).filter(|e| !e.is_empty());
    let cleared = state.otp_service.clear(email).await?;
    tracing::warn!("Debug OTP cleanup removed {} record(s)", cleared);

    Ok(Json(ClearOtpResponse {
        success: true,
        cleared,
    }))
}
