use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use super::notification::NotificationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One unit of fan-out work. Publishing writes a row and returns; workers
/// drain pending rows out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationJob {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub payload: JsonValue,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub result: Option<JsonValue>,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
