//! Shared state handed to every handler.

use crate::services::storage_service::ObjectStore;
use sqlx::SqlitePool;

/// Built once at startup; clones share the database pool and the S3 client.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub storage: ObjectStore,
}
