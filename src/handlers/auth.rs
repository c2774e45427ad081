use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::dtos::auth_dtos::{RegisterRequest, RegisterResponse};
use crate::errors::Result;
use crate::handlers::json_body;
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let req = json_body(payload)?;
    let account = state.account_service.register(req).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: true,
            message: "Account created successfully".to_string(),
            user: account.into(),
        }),
    ))
}
