use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::notification::{NotificationPreference, SubjectNotificationPreference};

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn global_preference(&self, user_id: Uuid) -> Result<Option<NotificationPreference>>;

    async fn subject_preference(
        &self,
        user_id: Uuid,
        subject_id: Uuid,
    ) -> Result<Option<SubjectNotificationPreference>>;
}

#[derive(Clone)]
pub struct PgPreferenceStore {
    pool: PgPool,
}

impl PgPreferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_global(&self, pref: &NotificationPreference) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_preferences
                (user_id, enabled, new_content_enabled, quiz_enabled, deadline_enabled,
                 quiet_hours_start, quiet_hours_end, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET enabled = EXCLUDED.enabled,
                new_content_enabled = EXCLUDED.new_content_enabled,
                quiz_enabled = EXCLUDED.quiz_enabled,
                deadline_enabled = EXCLUDED.deadline_enabled,
                quiet_hours_start = EXCLUDED.quiet_hours_start,
                quiet_hours_end = EXCLUDED.quiet_hours_end,
                updated_at = NOW()
            "#,
        )
        .bind(pref.user_id)
        .bind(pref.enabled)
        .bind(pref.new_content_enabled)
        .bind(pref.quiz_enabled)
        .bind(pref.deadline_enabled)
        .bind(pref.quiet_hours_start)
        .bind(pref.quiet_hours_end)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_subject(
        &self,
        user_id: Uuid,
        subject_id: Uuid,
        enabled: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subject_notification_preferences (user_id, subject_id, enabled, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id, subject_id) DO UPDATE
            SET enabled = EXCLUDED.enabled, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(subject_id)
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for PgPreferenceStore {
    async fn global_preference(&self, user_id: Uuid) -> Result<Option<NotificationPreference>> {
        let pref = sqlx::query_as::<_, NotificationPreference>(
            r#"SELECT * FROM notification_preferences WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(pref)
    }

    async fn subject_preference(
        &self,
        user_id: Uuid,
        subject_id: Uuid,
    ) -> Result<Option<SubjectNotificationPreference>> {
        let pref = sqlx::query_as::<_, SubjectNotificationPreference>(
            r#"SELECT * FROM subject_notification_preferences
               WHERE user_id = $1 AND subject_id = $2"#,
        )
        .bind(user_id)
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(pref)
    }
}
