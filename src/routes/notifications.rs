use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::dto::notification_dto::{
    NotificationListResponse, RegisterTokenRequest, RegisterTokenResponse,
    UpdatePreferenceRequest, UpdateSubjectPreferenceRequest,
};
use crate::middleware::auth::Claims;
use crate::models::notification::NotificationPreference;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[axum::debug_handler]
pub async fn register_token(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RegisterTokenRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let user_id = claims.user_id()?;
    let token = state
        .notification_store
        .register_token(user_id, &req.token, req.device_type)
        .await?;
    Ok(Json(RegisterTokenResponse {
        token_id: token.id,
        is_active: token.is_active,
    })
    .into_response())
}

#[axum::debug_handler]
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(pagination): Query<Pagination>,
) -> crate::error::Result<Response> {
    let user_id = claims.user_id()?;
    let page = pagination.page.unwrap_or(1).max(1);
    let limit = pagination.limit.unwrap_or(20).clamp(1, 100);
    let (notifications, total) = state
        .notification_store
        .list_history(user_id, page, limit)
        .await?;
    Ok(Json(NotificationListResponse {
        notifications,
        total,
        page,
        limit,
    })
    .into_response())
}

#[axum::debug_handler]
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(notification_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let user_id = claims.user_id()?;
    state
        .notification_store
        .mark_read(user_id, notification_id)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[axum::debug_handler]
pub async fn mark_clicked(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(notification_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let user_id = claims.user_id()?;
    state
        .notification_store
        .mark_clicked(user_id, notification_id)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[axum::debug_handler]
pub async fn update_preferences(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdatePreferenceRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let user_id = claims.user_id()?;
    let pref = NotificationPreference {
        user_id,
        enabled: req.enabled,
        new_content_enabled: req.new_content_enabled,
        quiz_enabled: req.quiz_enabled,
        deadline_enabled: req.deadline_enabled,
        quiet_hours_start: req.quiet_hours_start,
        quiet_hours_end: req.quiet_hours_end,
        updated_at: Utc::now(),
    };
    state.preference_store.upsert_global(&pref).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[axum::debug_handler]
pub async fn update_subject_preference(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateSubjectPreferenceRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let user_id = claims.user_id()?;
    state
        .preference_store
        .upsert_subject(user_id, req.subject_id, req.enabled)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
