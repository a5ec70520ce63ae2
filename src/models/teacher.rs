//! Represents a teacher record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A teacher as stored in the `teachers` table.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Teacher {
    /// Autoincrement primary key.
    pub id: i64,

    /// Display name; required.
    pub full_name: String,

    /// Subject taught, if known.
    pub subject: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Teacher {
    /// Insert a teacher and return the stored row.
    pub async fn create(
        db: &SqlitePool,
        full_name: &str,
        subject: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, Teacher>(
            "INSERT INTO teachers (full_name, subject, created_at, updated_at)
             VALUES (?, ?, ?, ?)
             RETURNING id, full_name, subject, created_at, updated_at",
        )
        .bind(full_name)
        .bind(subject)
        .bind(now)
        .bind(now)
        .fetch_one(db)
        .await
    }

    pub async fn find(db: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Teacher>(
            "SELECT id, full_name, subject, created_at, updated_at FROM teachers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(db)
        .await
    }

    /// Change the subject and bump `updated_at`.
    pub async fn set_subject(
        db: &SqlitePool,
        id: i64,
        subject: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Teacher>(
            "UPDATE teachers SET subject = ?, updated_at = ? WHERE id = ?
             RETURNING id, full_name, subject, created_at, updated_at",
        )
        .bind(subject)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(db)
        .await
    }
}
