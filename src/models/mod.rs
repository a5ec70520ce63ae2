//! Database models.
//!
//! Plain rows mapped with `sqlx::FromRow`; the schema lives in
//! `migrations/0001_init.sql`.

pub mod teacher;
pub mod user;
