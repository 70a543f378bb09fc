use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::notification::NotificationKind;
use crate::services::audience::AudienceResolver;
use crate::services::notification_service::NotificationStore;
use crate::services::push::PushGateway;

/// One unit of fan-out work, as carried through the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub subject_id: Uuid,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: JsonValue,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DispatchReport {
    pub students_considered: usize,
    pub db_saved: usize,
    pub push_sent: usize,
}

/// Fans one event out to its resolved audience. Each recipient is processed
/// independently; a failure for one never rolls back another, and history
/// rows survive push failures.
#[derive(Clone)]
pub struct NotificationDispatcher {
    resolver: AudienceResolver,
    store: Arc<dyn NotificationStore>,
    gateway: Arc<dyn PushGateway>,
}

impl NotificationDispatcher {
    pub fn new(
        resolver: AudienceResolver,
        store: Arc<dyn NotificationStore>,
        gateway: Arc<dyn PushGateway>,
    ) -> Self {
        Self {
            resolver,
            store,
            gateway,
        }
    }

    pub async fn dispatch(&self, event: &NotificationEvent) -> Result<DispatchReport> {
        let audience = self.resolver.resolve_audience(event.subject_id).await?;
        let mut report = DispatchReport {
            students_considered: audience.len(),
            ..Default::default()
        };

        for user_id in audience {
            match self
                .resolver
                .allows(user_id, event.subject_id, event.kind)
                .await
            {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    tracing::warn!(%user_id, error = %err, "preference lookup failed, skipping");
                    continue;
                }
            }

            // History first: the durable audit of the notification. Push is
            // best-effort on top of it.
            if let Err(err) = self
                .store
                .save_history(
                    user_id,
                    event.kind,
                    &event.title,
                    &event.message,
                    &event.data,
                )
                .await
            {
                tracing::error!(%user_id, error = %err, "history write failed, skipping recipient");
                continue;
            }
            report.db_saved += 1;

            let quiet = self
                .resolver
                .quiet_hours_active(user_id, Utc::now().time())
                .await
                .unwrap_or(false);
            if quiet {
                tracing::debug!(%user_id, "quiet hours, push withheld");
                continue;
            }

            if self.push_to_user(user_id, event).await {
                report.push_sent += 1;
            }
        }

        tracing::info!(
            kind = ?event.kind,
            subject_id = %event.subject_id,
            considered = report.students_considered,
            saved = report.db_saved,
            pushed = report.push_sent,
            "dispatch finished"
        );
        Ok(report)
    }

    /// Delivers to every active token; true when at least one delivered.
    async fn push_to_user(&self, user_id: Uuid, event: &NotificationEvent) -> bool {
        let tokens = match self.store.active_tokens(user_id).await {
            Ok(tokens) => tokens,
            Err(err) => {
                tracing::warn!(%user_id, error = %err, "token lookup failed");
                return false;
            }
        };

        let mut delivered_any = false;
        for token in tokens {
            let outcome = self
                .gateway
                .send(&token.token, &event.title, &event.message, &event.data)
                .await;

            if outcome == crate::services::push::PushOutcome::Delivered {
                delivered_any = true;
                if let Err(err) = self.store.touch_token(token.id).await {
                    tracing::warn!(token_id = %token.id, error = %err, "last_used update failed");
                }
            } else if outcome.deactivates_token() {
                tracing::info!(token_id = %token.id, ?outcome, "deactivating stale token");
                if let Err(err) = self.store.deactivate_token(token.id).await {
                    tracing::warn!(token_id = %token.id, error = %err, "token deactivation failed");
                }
            }
        }
        delivered_any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::notification::{
        DeviceType, FcmToken, NotificationPreference, SubjectNotificationPreference,
    };
    use crate::models::user::{Role, User};
    use crate::services::catalog::CatalogStore;
    use crate::services::directory::UserDirectory;
    use crate::services::preferences::PreferenceStore;
    use crate::services::push::{MockPushGateway, PushOutcome};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    struct FakeDirectory {
        students: Vec<Uuid>,
    }

    #[async_trait]
    impl UserDirectory for FakeDirectory {
        async fn get_user(&self, id: Uuid) -> Result<User> {
            Ok(User {
                id,
                email: format!("{}@example.com", id),
                name: "Student".into(),
                role: Role::Student,
                is_active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
        }

        async fn find_students_by_levels_and_majors(
            &self,
            _level_ids: &[Uuid],
            _major_ids: &[Uuid],
            _active_only: bool,
        ) -> Result<Vec<Uuid>> {
            Ok(self.students.clone())
        }
    }

    struct FakeCatalog;

    #[async_trait]
    impl CatalogStore for FakeCatalog {
        async fn subject_levels_and_majors(
            &self,
            _subject_id: Uuid,
        ) -> Result<(Vec<Uuid>, Vec<Uuid>)> {
            Ok((vec![Uuid::new_v4()], vec![Uuid::new_v4()]))
        }

        async fn get_subject(&self, subject_id: Uuid) -> Result<crate::models::catalog::Subject> {
            Ok(crate::models::catalog::Subject {
                id: subject_id,
                title: "Mathematics".into(),
                is_active: true,
                created_at: Utc::now(),
            })
        }
    }

    struct FakePreferences {
        disabled_users: HashSet<Uuid>,
        quiet_users: HashSet<Uuid>,
    }

    #[async_trait]
    impl PreferenceStore for FakePreferences {
        async fn global_preference(&self, user_id: Uuid) -> Result<Option<NotificationPreference>> {
            if self.disabled_users.contains(&user_id) {
                return Ok(None);
            }
            let quiet = self.quiet_users.contains(&user_id);
            Ok(Some(NotificationPreference {
                user_id,
                enabled: true,
                new_content_enabled: true,
                quiz_enabled: true,
                deadline_enabled: true,
                // covers the entire day so the test does not depend on the
                // wall clock
                quiet_hours_start: quiet.then(|| chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap()),
                quiet_hours_end: quiet
                    .then(|| chrono::NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap()),
                updated_at: Utc::now(),
            }))
        }

        async fn subject_preference(
            &self,
            _user_id: Uuid,
            _subject_id: Uuid,
        ) -> Result<Option<SubjectNotificationPreference>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct FakeStore {
        history: Mutex<Vec<Uuid>>,
        tokens: Mutex<HashMap<Uuid, FcmToken>>,
        history_failures: HashSet<Uuid>,
    }

    impl FakeStore {
        fn add_token(&self, user_id: Uuid, token: &str) -> Uuid {
            let id = Uuid::new_v4();
            self.tokens.lock().unwrap().insert(
                id,
                FcmToken {
                    id,
                    user_id,
                    token: token.to_string(),
                    device_type: DeviceType::Android,
                    is_active: true,
                    last_used: Utc::now(),
                    created_at: Utc::now(),
                },
            );
            id
        }

        fn active_count(&self) -> usize {
            self.tokens
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.is_active)
                .count()
        }
    }

    #[async_trait]
    impl NotificationStore for FakeStore {
        async fn save_history(
            &self,
            user_id: Uuid,
            _kind: NotificationKind,
            _title: &str,
            _message: &str,
            _data: &JsonValue,
        ) -> Result<Uuid> {
            if self.history_failures.contains(&user_id) {
                return Err(Error::Internal("history insert failed".into()));
            }
            self.history.lock().unwrap().push(user_id);
            Ok(Uuid::new_v4())
        }

        async fn active_tokens(&self, user_id: Uuid) -> Result<Vec<FcmToken>> {
            Ok(self
                .tokens
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.user_id == user_id && t.is_active)
                .cloned()
                .collect())
        }

        async fn deactivate_token(&self, token_id: Uuid) -> Result<()> {
            if let Some(token) = self.tokens.lock().unwrap().get_mut(&token_id) {
                token.is_active = false;
            }
            Ok(())
        }

        async fn touch_token(&self, token_id: Uuid) -> Result<()> {
            if let Some(token) = self.tokens.lock().unwrap().get_mut(&token_id) {
                token.last_used = Utc::now();
            }
            Ok(())
        }
    }

    fn build_dispatcher(
        students: Vec<Uuid>,
        disabled: HashSet<Uuid>,
        quiet: HashSet<Uuid>,
        store: Arc<FakeStore>,
        gateway: MockPushGateway,
    ) -> NotificationDispatcher {
        let resolver = AudienceResolver::new(
            Arc::new(FakeDirectory { students }),
            Arc::new(FakeCatalog),
            Arc::new(FakePreferences {
                disabled_users: disabled,
                quiet_users: quiet,
            }),
        );
        NotificationDispatcher::new(resolver, store, Arc::new(gateway))
    }

    fn event() -> NotificationEvent {
        NotificationEvent {
            kind: NotificationKind::NewDocument,
            subject_id: Uuid::new_v4(),
            title: "New material".into(),
            message: "A document was added".into(),
            data: json!({"document_id": Uuid::new_v4()}),
        }
    }

    #[tokio::test]
    async fn fan_out_counts_and_stale_token_deactivation() {
        // 10 matching students, 3 with notifications disabled, 2 of the
        // remaining with stale tokens.
        let students: Vec<Uuid> = (0..10).map(|_| Uuid::new_v4()).collect();
        let disabled: HashSet<Uuid> = students[..3].iter().copied().collect();

        let store = Arc::new(FakeStore::default());
        for (i, user) in students[3..].iter().enumerate() {
            let name = if i < 2 {
                format!("stale-{}", i)
            } else {
                format!("live-{}", i)
            };
            store.add_token(*user, &name);
        }

        let mut gateway = MockPushGateway::new();
        gateway.expect_send().returning(|token, _, _, _| {
            if token.starts_with("stale") {
                PushOutcome::Unregistered
            } else {
                PushOutcome::Delivered
            }
        });

        let dispatcher = build_dispatcher(
            students.clone(),
            disabled,
            HashSet::new(),
            store.clone(),
            gateway,
        );
        let report = dispatcher.dispatch(&event()).await.unwrap();

        assert_eq!(report.students_considered, 10);
        assert_eq!(report.db_saved, 7);
        assert_eq!(report.push_sent, 5);
        // the two stale tokens were flipped inactive
        assert_eq!(store.active_count(), 5);
    }

    #[tokio::test]
    async fn history_failure_skips_recipient_but_batch_continues() {
        let students: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let mut store = FakeStore::default();
        store.history_failures.insert(students[0]);
        let store = Arc::new(store);
        for user in &students {
            store.add_token(*user, "live");
        }

        let mut gateway = MockPushGateway::new();
        gateway
            .expect_send()
            .returning(|_, _, _, _| PushOutcome::Delivered);

        let dispatcher = build_dispatcher(
            students,
            HashSet::new(),
            HashSet::new(),
            store.clone(),
            gateway,
        );
        let report = dispatcher.dispatch(&event()).await.unwrap();

        assert_eq!(report.students_considered, 3);
        assert_eq!(report.db_saved, 2);
        // the failed recipient never reaches the gateway
        assert_eq!(report.push_sent, 2);
    }

    #[tokio::test]
    async fn quiet_hours_persist_history_but_withhold_push() {
        let student = Uuid::new_v4();
        let store = Arc::new(FakeStore::default());
        store.add_token(student, "live");

        let mut gateway = MockPushGateway::new();
        // must never be called
        gateway.expect_send().never();

        let quiet: HashSet<Uuid> = [student].into_iter().collect();
        let dispatcher =
            build_dispatcher(vec![student], HashSet::new(), quiet, store.clone(), gateway);
        let report = dispatcher.dispatch(&event()).await.unwrap();

        assert_eq!(report.db_saved, 1);
        assert_eq!(report.push_sent, 0);
        assert_eq!(store.history.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transient_errors_keep_tokens_and_count_no_delivery() {
        let student = Uuid::new_v4();
        let store = Arc::new(FakeStore::default());
        store.add_token(student, "flaky");

        let mut gateway = MockPushGateway::new();
        gateway
            .expect_send()
            .returning(|_, _, _, _| PushOutcome::TransientError);

        let dispatcher = build_dispatcher(
            vec![student],
            HashSet::new(),
            HashSet::new(),
            store.clone(),
            gateway,
        );
        let report = dispatcher.dispatch(&event()).await.unwrap();

        assert_eq!(report.db_saved, 1);
        assert_eq!(report.push_sent, 0);
        // retry candidate stays active
        assert_eq!(store.active_count(), 1);
    }

    #[tokio::test]
    async fn one_delivered_token_is_enough_to_count_the_user() {
        let student = Uuid::new_v4();
        let store = Arc::new(FakeStore::default());
        store.add_token(student, "stale-0");
        store.add_token(student, "live-0");

        let mut gateway = MockPushGateway::new();
        gateway.expect_send().returning(|token, _, _, _| {
            if token.starts_with("stale") {
                PushOutcome::Unregistered
            } else {
                PushOutcome::Delivered
            }
        });

        let dispatcher = build_dispatcher(
            vec![student],
            HashSet::new(),
            HashSet::new(),
            store.clone(),
            gateway,
        );
        let report = dispatcher.dispatch(&event()).await.unwrap();

        assert_eq!(report.push_sent, 1);
        assert_eq!(store.active_count(), 1);
    }
}
