use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quiz {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub title: String,
    pub duration_minutes: i32,
    pub passing_percentage: Decimal,
    pub max_attempts: i32,
    pub show_correction: bool,
    pub is_active: bool,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
    pub closing_notified: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quiz {
    /// Availability check for student-initiated attempts. An inactive quiz
    /// is never available; window bounds apply only when set.
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if let Some(from) = self.available_from {
            if now < from {
                return false;
            }
        }
        if let Some(until) = self.available_until {
            if now > until {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "question_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    TrueFalse,
    MultiChoice,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub question_type: QuestionType,
    pub text: String,
    pub points: Decimal,
    pub position: i32,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Choice {
    pub id: Uuid,
    pub question_id: Uuid,
    pub text: String,
    pub is_correct: bool,
    pub position: i32,
}

/// A question together with its choices, the unit the grading logic
/// operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionWithChoices {
    pub question: Question,
    pub choices: Vec<Choice>,
}

impl QuestionWithChoices {
    pub fn correct_choice_ids(&self) -> Vec<Uuid> {
        self.choices
            .iter()
            .filter(|c| c.is_correct)
            .map(|c| c.id)
            .collect()
    }
}
