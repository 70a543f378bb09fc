use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::notification::{DeviceType, FcmToken, NotificationHistory, NotificationKind};

/// Durable side of the dispatcher: history rows and the delivery-token
/// registry.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn save_history(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        title: &str,
        message: &str,
        data: &JsonValue,
    ) -> Result<Uuid>;

    async fn active_tokens(&self, user_id: Uuid) -> Result<Vec<FcmToken>>;

    async fn deactivate_token(&self, token_id: Uuid) -> Result<()>;

    async fn touch_token(&self, token_id: Uuid) -> Result<()>;
}

#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Client registration. Re-registering an existing (user, token) pair
    /// refreshes it and reactivates a previously retired token.
    pub async fn register_token(
        &self,
        user_id: Uuid,
        token: &str,
        device_type: DeviceType,
    ) -> Result<FcmToken> {
        let row = sqlx::query_as::<_, FcmToken>(
            r#"
            INSERT INTO fcm_tokens (id, user_id, token, device_type, is_active, last_used)
            VALUES ($1, $2, $3, $4, TRUE, $5)
            ON CONFLICT (user_id, token) DO UPDATE
            SET device_type = EXCLUDED.device_type, is_active = TRUE, last_used = EXCLUDED.last_used
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(token)
        .bind(device_type)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_history(
        &self,
        user_id: Uuid,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<NotificationHistory>, i64)> {
        let offset = (page - 1) * limit;
        let rows = sqlx::query_as::<_, NotificationHistory>(
            r#"
            SELECT * FROM notification_history
            WHERE user_id = $1
            ORDER BY sent_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM notification_history WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((rows, total))
    }

    pub async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> Result<()> {
        self.flip_flag(user_id, notification_id, "is_read").await
    }

    pub async fn mark_clicked(&self, user_id: Uuid, notification_id: Uuid) -> Result<()> {
        self.flip_flag(user_id, notification_id, "is_clicked").await
    }

    async fn flip_flag(&self, user_id: Uuid, notification_id: Uuid, column: &str) -> Result<()> {
        // column is one of two fixed names, never caller input
        let sql = format!(
            "UPDATE notification_history SET {} = TRUE WHERE id = $1 AND user_id = $2",
            column
        );
        let result = sqlx::query(&sql)
            .bind(notification_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Notification not found".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn save_history(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        title: &str,
        message: &str,
        data: &JsonValue,
    ) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO notification_history (id, user_id, kind, title, message, data, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(kind)
        .bind(title)
        .bind(message)
        .bind(data)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn active_tokens(&self, user_id: Uuid) -> Result<Vec<FcmToken>> {
        let tokens = sqlx::query_as::<_, FcmToken>(
            r#"SELECT * FROM fcm_tokens WHERE user_id = $1 AND is_active = TRUE"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }

    async fn deactivate_token(&self, token_id: Uuid) -> Result<()> {
        sqlx::query(r#"UPDATE fcm_tokens SET is_active = FALSE WHERE id = $1"#)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_token(&self, token_id: Uuid) -> Result<()> {
        sqlx::query(r#"UPDATE fcm_tokens SET last_used = $2 WHERE id = $1"#)
            .bind(token_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
