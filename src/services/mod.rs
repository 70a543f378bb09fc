pub mod attempt_service;
pub mod audience;
pub mod audit_service;
pub mod catalog;
pub mod content_service;
pub mod directory;
pub mod dispatcher;
pub mod grading;
pub mod kv;
pub mod notification_service;
pub mod otp;
pub mod preferences;
pub mod push;
pub mod queue_service;
pub mod quiz_service;
pub mod user_service;
