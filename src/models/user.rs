use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

/// Actions gated by role. Resolved once per role into a fixed set instead of
/// string comparisons scattered across handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ManageUsers,
    ManageContent,
    ManageQuizzes,
    TakeQuizzes,
    DispatchReminders,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionSet(&'static [Permission]);

impl PermissionSet {
    pub fn allows(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn as_slice(&self) -> &'static [Permission] {
        self.0
    }
}

impl Role {
    pub fn permissions(&self) -> PermissionSet {
        match self {
            Role::Admin => PermissionSet(&[
                Permission::ManageUsers,
                Permission::ManageContent,
                Permission::ManageQuizzes,
                Permission::DispatchReminders,
            ]),
            Role::Teacher => PermissionSet(&[
                Permission::ManageContent,
                Permission::ManageQuizzes,
            ]),
            Role::Student => PermissionSet(&[Permission::TakeQuizzes]),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentProfile {
    pub user_id: Uuid,
    pub level_id: Uuid,
    pub major_id: Uuid,
    pub created_at: DateTime<Utc>,
}
