//! HTTP read surface for the sensor feed.
//!
//! Gateway (EMBP): `main.rs` only sees [`router`]; each sibling module
//! contributes a subrouter that is merged here.

use axum::Router;

use crate::SensorFeed;

mod health;
mod readings;

// ---

pub fn router(feed: SensorFeed) -> Router {
    // ---
    Router::new()
        .merge(readings::router())
        .merge(health::router())
        .with_state(feed)
}
