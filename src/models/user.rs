//! Represents an application user account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Value of `is_active` for accounts that may sign in.
pub const ACTIVE: &str = "active";

/// A user as stored in the `users` table.
///
/// `hashed_password` never leaves the service, so it is skipped when the
/// record is serialized.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct User {
    pub id: i64,

    /// Login email, unique across users.
    pub email: String,

    #[serde(skip_serializing)]
    pub hashed_password: String,

    /// Account state, `"active"` by default.
    pub is_active: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub async fn create(
        db: &SqlitePool,
        email: &str,
        hashed_password: &str,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, User>(
            "INSERT INTO users (email, hashed_password, is_active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id, email, hashed_password, is_active, created_at, updated_at",
        )
        .bind(email)
        .bind(hashed_password)
        .bind(ACTIVE)
        .bind(now)
        .bind(now)
        .fetch_one(db)
        .await
    }

    pub async fn find_by_email(db: &SqlitePool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT id, email, hashed_password, is_active, created_at, updated_at
             FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(db)
        .await
    }

    pub fn is_active(&self) -> bool {
        self.is_active == ACTIVE
    }
}
