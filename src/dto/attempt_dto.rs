use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::attempt::AttemptStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAttemptResponse {
    pub attempt_id: Uuid,
    pub quiz_id: Uuid,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_minutes: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerInput {
    pub question_id: Uuid,
    pub selected_choice_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitAnswersRequest {
    #[validate(length(min = 1, message = "at least one answer is required"))]
    pub answers: Vec<AnswerInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerCorrection {
    pub question_id: Uuid,
    pub selected_choice_ids: Vec<Uuid>,
    pub correct_choice_ids: Vec<Uuid>,
    pub is_correct: bool,
    pub points_earned: Decimal,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResultResponse {
    pub attempt_id: Uuid,
    pub quiz_id: Uuid,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub score: Decimal,
    pub total_points: Decimal,
    pub percentage: Decimal,
    pub passed: bool,
    /// Score rescaled to the fixed 0-20 display range.
    pub normalized_score: Decimal,
    pub normalized_passing_threshold: Decimal,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Present only when the quiz exposes corrections.
    pub corrections: Option<Vec<AnswerCorrection>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempt_id: Uuid,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub score: Option<Decimal>,
    pub passed: Option<bool>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}
