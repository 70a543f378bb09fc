use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::catalog::Subject;

/// Read model over the content catalog: which levels and majors a subject
/// is taught to. Mutated only by authoring flows outside the core.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn subject_levels_and_majors(
        &self,
        subject_id: Uuid,
    ) -> Result<(Vec<Uuid>, Vec<Uuid>)>;

    async fn get_subject(&self, subject_id: Uuid) -> Result<Subject>;
}

#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn subject_levels_and_majors(
        &self,
        subject_id: Uuid,
    ) -> Result<(Vec<Uuid>, Vec<Uuid>)> {
        let levels = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT level_id FROM subject_levels WHERE subject_id = $1"#,
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        let majors = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT major_id FROM subject_majors WHERE subject_id = $1"#,
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        Ok((levels, majors))
    }

    async fn get_subject(&self, subject_id: Uuid) -> Result<Subject> {
        let subject = sqlx::query_as::<_, Subject>(r#"SELECT * FROM subjects WHERE id = $1"#)
            .bind(subject_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(subject)
    }
}
