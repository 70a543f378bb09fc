use axum::{
    extract::State,
    response::{IntoResponse, Json, Response},
    Extension,
};
use serde_json::json;
use validator::Validate;

use crate::dto::auth_dto::{CreateStudentRequest, CreateTeacherRequest};
use crate::dto::notification_dto::ProjectReminderRequest;
use crate::dto::quiz_dto::{CreateDocumentRequest, CreateQuizRequest};
use crate::middleware::auth::Claims;
use crate::models::notification::NotificationKind;
use crate::services::dispatcher::NotificationEvent;
use crate::AppState;

#[axum::debug_handler]
pub async fn create_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateQuizRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let user_id = claims.user_id()?;

    let quiz = state.quiz_service.create_quiz(&req, user_id).await?;

    if let Err(err) = state
        .audit_service
        .log(
            Some(user_id),
            "create_quiz",
            "quiz",
            quiz.id,
            Some(json!({ "title": quiz.title, "subject_id": quiz.subject_id })),
        )
        .await
    {
        tracing::error!(quiz_id = %quiz.id, error = %err, "audit write failed");
    }

    Ok(Json(quiz).into_response())
}

#[axum::debug_handler]
pub async fn create_document(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateDocumentRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let user_id = claims.user_id()?;
    let document = state.content_service.create_document(&req, user_id).await?;
    Ok(Json(document).into_response())
}

#[axum::debug_handler]
pub async fn create_teacher(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateTeacherRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let actor = claims.user_id()?;
    let user = state.user_service.create_teacher(&req.email, &req.name).await?;
    if let Err(err) = state
        .audit_service
        .log(Some(actor), "create_teacher", "user", user.id, None)
        .await
    {
        tracing::error!(user_id = %user.id, error = %err, "audit write failed");
    }
    Ok(Json(user).into_response())
}

#[axum::debug_handler]
pub async fn create_student(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateStudentRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let actor = claims.user_id()?;
    let (user, profile) = state
        .user_service
        .create_student(&req.email, &req.name, req.level_id, req.major_id)
        .await?;
    if let Err(err) = state
        .audit_service
        .log(Some(actor), "create_student", "user", user.id, None)
        .await
    {
        tracing::error!(user_id = %user.id, error = %err, "audit write failed");
    }
    Ok(Json(json!({ "user": user, "profile": profile })).into_response())
}

#[axum::debug_handler]
pub async fn send_project_reminder(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ProjectReminderRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let user_id = claims.user_id()?;

    let event = NotificationEvent {
        kind: NotificationKind::ProjectReminder,
        subject_id: req.subject_id,
        title: req.title.clone(),
        message: req.message.clone(),
        data: json!({ "sent_by": user_id }),
    };
    let job_id = state.queue.enqueue(&event).await?;

    Ok(Json(json!({ "job_id": job_id, "status": "queued" })).into_response())
}
