use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewDocument,
    NewQuiz,
    QuizClosing,
    ProjectReminder,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationHistory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: JsonValue,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_clicked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "device_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Android,
    Ios,
    Web,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FcmToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub device_type: DeviceType,
    pub is_active: bool,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Per-user global gate consulted before any dispatch. The quiet-hours
/// window holds local wall-clock times and may wrap past midnight.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationPreference {
    pub user_id: Uuid,
    pub enabled: bool,
    pub new_content_enabled: bool,
    pub quiz_enabled: bool,
    pub deadline_enabled: bool,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubjectNotificationPreference {
    pub user_id: Uuid,
    pub subject_id: Uuid,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}
