use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::dto::quiz_dto::CreateDocumentRequest;
use crate::error::{Error, Result};
use crate::models::catalog::{Document, Subject};
use crate::models::notification::NotificationKind;
use crate::services::dispatcher::NotificationEvent;
use crate::services::queue_service::NotificationQueue;

#[derive(Clone)]
pub struct ContentService {
    pool: PgPool,
    queue: NotificationQueue,
}

impl ContentService {
    pub fn new(pool: PgPool, queue: NotificationQueue) -> Self {
        Self { pool, queue }
    }

    /// Persists the document, then explicitly enqueues the new_document
    /// fan-out. The write path never waits on delivery.
    pub async fn create_document(
        &self,
        req: &CreateDocumentRequest,
        created_by: Uuid,
    ) -> Result<Document> {
        let subject = sqlx::query_as::<_, Subject>(r#"SELECT * FROM subjects WHERE id = $1"#)
            .bind(req.subject_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Subject not found".to_string()))?;
        if !subject.is_active {
            return Err(Error::BadRequest(
                "Cannot publish to an inactive subject".to_string(),
            ));
        }

        let document = sqlx::query_as::<_, Document>(
            r#"
            INSERT INTO documents (id, subject_id, title, file_url, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(req.subject_id)
        .bind(&req.title)
        .bind(&req.file_url)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await?;

        let event = NotificationEvent {
            kind: NotificationKind::NewDocument,
            subject_id: document.subject_id,
            title: "New course material".to_string(),
            message: format!("\"{}\" was added to your subject", document.title),
            data: json!({ "document_id": document.id }),
        };
        if let Err(err) = self.queue.enqueue(&event).await {
            tracing::error!(document_id = %document.id, error = %err, "failed to enqueue document fan-out");
        }

        Ok(document)
    }
}
