pub mod attempt_dto;
pub mod auth_dto;
pub mod notification_dto;
pub mod quiz_dto;
