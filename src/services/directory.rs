use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::user::User;

/// Read access to the user directory. The core never walks user tables
/// directly; the resolver and dispatcher go through this seam.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: Uuid) -> Result<User>;

    /// Students whose profile level appears in `level_ids` AND whose major
    /// appears in `major_ids`. The two memberships are independent; the
    /// result is deduplicated.
    async fn find_students_by_levels_and_majors(
        &self,
        level_ids: &[Uuid],
        major_ids: &[Uuid],
        active_only: bool,
    ) -> Result<Vec<Uuid>>;
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get_user(&self, id: Uuid) -> Result<User> {
        let user = sqlx::query_as::<_, User>(r#"SELECT * FROM users WHERE id = $1"#)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_students_by_levels_and_majors(
        &self,
        level_ids: &[Uuid],
        major_ids: &[Uuid],
        active_only: bool,
    ) -> Result<Vec<Uuid>> {
        let users = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT u.id
            FROM users u
            JOIN student_profiles sp ON sp.user_id = u.id
            WHERE u.role = 'student'
              AND sp.level_id = ANY($1)
              AND sp.major_id = ANY($2)
              AND ($3 = FALSE OR u.is_active = TRUE)
            "#,
        )
        .bind(level_ids)
        .bind(major_ids)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}
