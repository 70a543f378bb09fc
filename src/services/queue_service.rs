use chrono::{Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::models::job::NotificationJob;
use crate::services::dispatcher::{NotificationDispatcher, NotificationEvent};

const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Durable fan-out queue. Publishing writes a row and returns immediately;
/// workers claim rows with `FOR UPDATE SKIP LOCKED` so several workers can
/// drain concurrently without double-processing.
#[derive(Clone)]
pub struct NotificationQueue {
    pool: PgPool,
}

impl NotificationQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(&self, event: &NotificationEvent) -> Result<Uuid> {
        let payload = serde_json::to_value(event)?;
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO notification_jobs (id, kind, payload, status, max_attempts)
            VALUES ($1, $2, $3, 'pending', $4)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.kind)
        .bind(payload)
        .bind(DEFAULT_MAX_ATTEMPTS)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Result<NotificationJob> {
        let job =
            sqlx::query_as::<_, NotificationJob>(r#"SELECT * FROM notification_jobs WHERE id = $1"#)
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(job)
    }

    /// Claims and processes at most one job. Returns false when the queue
    /// had nothing due, so callers can back off.
    pub async fn run_once(&self, dispatcher: &NotificationDispatcher) -> Result<bool> {
        let claimed = sqlx::query(
            r#"
            UPDATE notification_jobs
            SET status = 'running', attempts = attempts + 1, updated_at = NOW()
            WHERE id = (
                SELECT id FROM notification_jobs
                WHERE status = 'pending'
                  AND (next_retry_at IS NULL OR next_retry_at <= NOW())
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, payload, attempts, max_attempts
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = claimed else { return Ok(false) };
        let job_id: Uuid = row.try_get("id")?;
        let payload: serde_json::Value = row.try_get("payload")?;
        let attempts: i32 = row.try_get("attempts")?;
        let max_attempts: i32 = row.try_get("max_attempts")?;

        let event: NotificationEvent = match serde_json::from_value(payload) {
            Ok(event) => event,
            Err(err) => {
                // Unparseable payloads can never succeed; fail them outright.
                self.mark_failed(job_id, &format!("bad payload: {}", err))
                    .await?;
                return Ok(true);
            }
        };

        match dispatcher.dispatch(&event).await {
            Ok(report) => {
                sqlx::query(
                    r#"
                    UPDATE notification_jobs
                    SET status = 'succeeded', result = $2, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(job_id)
                .bind(serde_json::to_value(report)?)
                .execute(&self.pool)
                .await?;
            }
            Err(err) => {
                if attempts < max_attempts {
                    self.schedule_retry(job_id, attempts, &err.to_string())
                        .await?;
                } else {
                    self.mark_failed(job_id, &err.to_string()).await?;
                }
            }
        }

        Ok(true)
    }

    async fn schedule_retry(&self, job_id: Uuid, attempts: i32, error: &str) -> Result<()> {
        // 30s, 60s, 120s... capped at an hour
        let backoff_secs = (30_i64 << (attempts - 1).min(8)).min(3600);
        let next_retry = Utc::now() + Duration::seconds(backoff_secs);
        sqlx::query(
            r#"
            UPDATE notification_jobs
            SET status = 'pending', last_error = $2, next_retry_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(next_retry)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_jobs
            SET status = 'failed', last_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
