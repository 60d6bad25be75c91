use axum::{extract::State, routing::get, Json, Router};
use tracing::debug;

use crate::{PipelineResult, SensorFeed};

// ---

pub fn router() -> Router<SensorFeed> {
    // ---
    Router::new().route("/readings", get(handler))
}

/// Handle `GET /readings`.
///
/// Returns the latest published result: `current` is `null` and `history`
/// empty while there is no data or after the subscription failed.
async fn handler(State(feed): State<SensorFeed>) -> Json<PipelineResult> {
    // ---
    let result = feed.latest();
    debug!(
        "GET /readings - current={} history={}",
        result.current.is_some(),
        result.history.len()
    );
    Json(result)
}
