use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::quiz::QuestionType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChoice {
    pub text: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateQuestion {
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub text: String,
    pub points: Decimal,
    pub explanation: Option<String>,
    pub choices: Vec<CreateChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateQuizRequest {
    pub subject_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(range(min = 1))]
    pub duration_minutes: i32,
    pub passing_percentage: Decimal,
    #[validate(range(min = 1))]
    pub max_attempts: i32,
    pub show_correction: Option<bool>,
    pub is_active: Option<bool>,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
    #[validate(length(min = 1, message = "a quiz needs at least one question"))]
    pub questions: Vec<CreateQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceView {
    pub id: Uuid,
    pub text: String,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub text: String,
    pub points: Decimal,
    pub position: i32,
    pub choices: Vec<ChoiceView>,
}

/// Student-facing projection: no correctness flags, no explanations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizView {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub title: String,
    pub duration_minutes: i32,
    pub passing_percentage: Decimal,
    pub max_attempts: i32,
    pub show_correction: bool,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
    pub total_points: Decimal,
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateDocumentRequest {
    pub subject_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(url)]
    pub file_url: Option<String>,
}
