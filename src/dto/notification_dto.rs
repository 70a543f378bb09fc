use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::notification::{DeviceType, NotificationHistory};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterTokenRequest {
    #[validate(length(min = 1, max = 4096))]
    pub token: String,
    pub device_type: DeviceType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterTokenResponse {
    pub token_id: Uuid,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<NotificationHistory>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdatePreferenceRequest {
    pub enabled: bool,
    pub new_content_enabled: bool,
    pub quiz_enabled: bool,
    pub deadline_enabled: bool,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateSubjectPreferenceRequest {
    pub subject_id: Uuid,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProjectReminderRequest {
    pub subject_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
}
