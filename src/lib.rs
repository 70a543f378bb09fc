pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use sqlx::PgPool;

use crate::services::attempt_service::AttemptEngine;
use crate::services::audience::AudienceResolver;
use crate::services::audit_service::AuditService;
use crate::services::catalog::PgCatalogStore;
use crate::services::content_service::ContentService;
use crate::services::directory::PgUserDirectory;
use crate::services::dispatcher::NotificationDispatcher;
use crate::services::kv::InMemoryKvStore;
use crate::services::notification_service::PgNotificationStore;
use crate::services::otp::OtpService;
use crate::services::preferences::PgPreferenceStore;
use crate::services::push::FcmGateway;
use crate::services::queue_service::NotificationQueue;
use crate::services::quiz_service::QuizService;
use crate::services::user_service::UserService;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub attempt_engine: AttemptEngine,
    pub quiz_service: QuizService,
    pub content_service: ContentService,
    pub user_service: UserService,
    pub notification_store: PgNotificationStore,
    pub preference_store: PgPreferenceStore,
    pub queue: NotificationQueue,
    pub dispatcher: NotificationDispatcher,
    pub audit_service: AuditService,
    pub otp_service: OtpService,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let config = crate::config::get_config();
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        let queue = NotificationQueue::new(pool.clone());
        let attempt_engine = AttemptEngine::new(pool.clone());
        let quiz_service = QuizService::new(pool.clone(), queue.clone());
        let content_service = ContentService::new(pool.clone(), queue.clone());
        let user_service = UserService::new(pool.clone());
        let notification_store = PgNotificationStore::new(pool.clone());
        let preference_store = PgPreferenceStore::new(pool.clone());
        let audit_service = AuditService::new(pool.clone());

        let resolver = AudienceResolver::new(
            Arc::new(PgUserDirectory::new(pool.clone())),
            Arc::new(PgCatalogStore::new(pool.clone())),
            Arc::new(preference_store.clone()),
        );
        let gateway = FcmGateway::new(
            http_client,
            config.fcm_endpoint.clone(),
            config.fcm_server_key.clone(),
        );
        let dispatcher = NotificationDispatcher::new(
            resolver,
            Arc::new(notification_store.clone()),
            Arc::new(gateway),
        );

        let otp_service = OtpService::new(
            Arc::new(InMemoryKvStore::new()),
            Duration::from_secs(config.otp_ttl_seconds),
        );

        Self {
            pool,
            attempt_engine,
            quiz_service,
            content_service,
            user_service,
            notification_store,
            preference_store,
            queue,
            dispatcher,
            audit_service,
            otp_service,
        }
    }
}
