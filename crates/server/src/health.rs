//! Liveness endpoint.

use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub(crate) struct Health {
    status: &'static str,
}

/// Report process liveness.
pub(crate) async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}
