use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json, Response},
    Extension,
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::dto::attempt_dto::{StartAttemptResponse, SubmitAnswersRequest};
use crate::middleware::auth::Claims;
use crate::AppState;

#[axum::debug_handler]
pub async fn get_quiz(
    State(state): State<AppState>,
    Path(quiz_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let view = state.quiz_service.get_quiz_view(quiz_id).await?;
    Ok(Json(view).into_response())
}

#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let user_id = claims.user_id()?;
    let attempt = state.attempt_engine.start_attempt(user_id, quiz_id).await?;
    let quiz = state.attempt_engine.get_quiz(quiz_id).await?;

    tracing::info!(%user_id, %quiz_id, attempt_number = attempt.attempt_number, "attempt started");

    Ok(Json(StartAttemptResponse {
        attempt_id: attempt.id,
        quiz_id: attempt.quiz_id,
        attempt_number: attempt.attempt_number,
        status: attempt.status,
        started_at: attempt.started_at,
        duration_minutes: quiz.duration_minutes,
    })
    .into_response())
}

#[axum::debug_handler]
pub async fn submit_answers(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<SubmitAnswersRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let user_id = claims.user_id()?;

    let result = state
        .attempt_engine
        .submit_answers(user_id, attempt_id, &req)
        .await?;

    if let Err(err) = state
        .audit_service
        .log(
            Some(user_id),
            "submit_attempt",
            "quiz_attempt",
            attempt_id,
            Some(json!({
                "score": result.score,
                "percentage": result.percentage,
                "passed": result.passed,
            })),
        )
        .await
    {
        tracing::error!(%attempt_id, error = %err, "audit write failed");
    }

    Ok(Json(result).into_response())
}

#[axum::debug_handler]
pub async fn abandon_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let user_id = claims.user_id()?;
    let attempt = state.attempt_engine.abandon(user_id, attempt_id).await?;
    Ok(Json(json!({
        "attempt_id": attempt.id,
        "status": attempt.status,
        "completed_at": attempt.completed_at,
    }))
    .into_response())
}

#[axum::debug_handler]
pub async fn get_result(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let user_id = claims.user_id()?;
    let result = state.attempt_engine.get_result(user_id, attempt_id).await?;
    Ok(Json(result).into_response())
}

#[axum::debug_handler]
pub async fn list_my_attempts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let user_id = claims.user_id()?;
    let attempts = state.attempt_engine.list_attempts(user_id, quiz_id).await?;
    Ok(Json(json!({ "attempts": attempts })).into_response())
}
