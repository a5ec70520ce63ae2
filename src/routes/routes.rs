//! Defines the HTTP surface.
//!
//! ## Structure
//! - **Health endpoints**
//!   - `GET    /ping`    — database round trip
//!   - `GET    /healthz` — liveness
//!   - `GET    /readyz`  — database + bucket readiness
//!
//! - **Object endpoints**
//!   - `GET    /objects?prefix=`   — list objects
//!   - `PUT    /objects/{*key}`    — upload object (streamed)
//!   - `GET    /objects/{*key}`    — download object (streamed)
//!   - `HEAD   /objects/{*key}`    — existence check
//!   - `DELETE /objects/{*key}`    — delete object
//!   - `GET    /presign/{*key}`    — presigned download URL
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, ping, readyz},
        object_handlers::{
            delete_object, get_object, head_object, list_objects, presign_object, upload_object,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, put},
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

/// Build and return the router for all routes.
///
/// The router carries shared state (`AppState`) to all handlers and is
/// wrapped in request tracing and the CORS policy for `allowed_origins`.
pub fn routes(allowed_origins: &[String]) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/ping", get(ping))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Object-level routes
        .route("/objects", get(list_objects))
        .route(
            "/objects/{*key}",
            put(upload_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object),
        )
        .route("/presign/{*key}", get(presign_object))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

/// `*` allows any origin without credentials; an explicit list allows
/// credentials and mirrors the requested methods and headers.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!("Ignoring invalid CORS origin `{}`: {}", origin, err);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
