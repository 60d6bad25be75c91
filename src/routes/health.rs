// src/routes/health.rs
//! Liveness endpoint for the sensorfeed service.
//!
//! Reports whether the process is up and whether the feed is still
//! attached. It says nothing about whether data is flowing; `/readings`
//! carries that as an empty result.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::SensorFeed;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    feed_attached: bool,
}

/// Handle `GET /health`.
///
/// Never touches the external source; only reads local feed state.
async fn health(State(feed): State<SensorFeed>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        feed_attached: feed.is_live(),
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<SensorFeed> {
    Router::new().route("/health", get(health))
}
