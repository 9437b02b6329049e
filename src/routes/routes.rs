//! Routes of the read-only object server.
//!
//! - `GET  /healthz`, `GET /readyz` probes
//! - `GET  /{bucket}/{*key}` stream an object
//! - `HEAD /{bucket}/{*key}` object headers only
//!
//! The wildcard `*key` allows nested keys like `{sha1}/logo.svg`.

use crate::handlers::{
    AppState,
    health_handlers::{healthz, readyz},
    object_handlers::{get_object, head_object},
};
use axum::{Router, routing::get};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/{bucket}/{*key}", get(get_object).head(head_object))
}
