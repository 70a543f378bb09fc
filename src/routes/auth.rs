use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use validator::Validate;

use crate::dto::auth_dto::{RequestOtpRequest, TokenResponse, VerifyOtpRequest};
use crate::error::Error;
use crate::middleware::auth::issue_token;
use crate::AppState;

#[axum::debug_handler]
pub async fn request_otp(
    State(state): State<AppState>,
    Json(req): Json<RequestOtpRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;

    let user = state.user_service.get_user_by_email(&req.email).await?;
    let Some(user) = user else {
        return Err(Error::NotFound("No account for this email".to_string()));
    };
    if !user.is_active {
        return Err(Error::Forbidden("Account is deactivated".to_string()));
    }

    let _code = state.otp_service.issue(&req.email).await?;
    // Delivery goes through an external channel; the code never appears in
    // responses or logs.
    tracing::info!(user_id = %user.id, "login code issued");

    Ok(StatusCode::NO_CONTENT.into_response())
}

#[axum::debug_handler]
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(req): Json<VerifyOtpRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;

    if !state.otp_service.verify(&req.email, &req.code).await? {
        return Err(Error::Unauthorized("Invalid or expired code".to_string()));
    }

    let user = state
        .user_service
        .get_user_by_email(&req.email)
        .await?
        .ok_or_else(|| Error::NotFound("No account for this email".to_string()))?;

    let access_token = issue_token(&user)?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in_seconds: 24 * 60 * 60,
    })
    .into_response())
}
