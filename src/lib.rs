//! HTTP API scaffold: health checks, a small SQLite data layer and an
//! S3-compatible object store.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
