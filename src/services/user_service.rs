use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::catalog::{Level, Major};
use crate::models::user::{Role, StudentProfile, User};

#[derive(Clone)]
pub struct UserService {
    pool: PgPool,
}

impl UserService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User> {
        let user = sqlx::query_as::<_, User>(r#"SELECT * FROM users WHERE id = $1"#)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(r#"SELECT * FROM users WHERE email = $1"#)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Creates a teacher account. Permission grant is the fixed role
    /// permission set; nothing happens through implicit save hooks.
    pub async fn create_teacher(&self, email: &str, name: &str) -> Result<User> {
        let user = self.insert_user(email, name, Role::Teacher).await?;
        Ok(user)
    }

    /// Creates a student account together with its profile, in one
    /// transaction. The profile is what makes the student reachable by the
    /// audience resolver.
    pub async fn create_student(
        &self,
        email: &str,
        name: &str,
        level_id: Uuid,
        major_id: Uuid,
    ) -> Result<(User, StudentProfile)> {
        sqlx::query_as::<_, Level>(r#"SELECT * FROM levels WHERE id = $1"#)
            .bind(level_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::BadRequest("Unknown level".to_string()))?;
        sqlx::query_as::<_, Major>(r#"SELECT * FROM majors WHERE id = $1"#)
            .bind(major_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::BadRequest("Unknown major".to_string()))?;

        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, name, role, is_active)
            VALUES ($1, $2, $3, $4, TRUE)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(name)
        .bind(Role::Student)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_duplicate_email)?;

        let profile = sqlx::query_as::<_, StudentProfile>(
            r#"
            INSERT INTO student_profiles (user_id, level_id, major_id)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(level_id)
        .bind(major_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((user, profile))
    }

    async fn insert_user(&self, email: &str, name: &str, role: Role) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, name, role, is_active)
            VALUES ($1, $2, $3, $4, TRUE)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(name)
        .bind(role)
        .fetch_one(&self.pool)
        .await
        .map_err(map_duplicate_email)?;
        Ok(user)
    }
}

fn map_duplicate_email(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::Conflict("A user with this email already exists".to_string())
        }
        _ => Error::from(err),
    }
}
