//! External push sources.
//!
//! A [`DataSource`] is the connection to wherever sensor snapshots come
//! from. It is built once by the composition root and shared behind an
//! `Arc` by every feed that needs it; nothing in the crate reaches for a
//! global handle.
//!
//! - [`firebase`]: realtime-database REST streaming client
//! - [`sse`]: `text/event-stream` decoder used by the firebase client

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

pub mod firebase;
pub mod sse;

pub use firebase::FirebaseSource;

// ---

/// Full snapshots of the subscribed path, one per change. Dropping the
/// stream releases the subscription.
pub type PayloadStream = BoxStream<'static, Result<Value, SourceError>>;

/// Failures reported by a [`DataSource`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("anonymous sign-in failed: {0}")]
    Auth(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("subscription cancelled by server: {0}")]
    Cancelled(String),

    #[error("credentials revoked by server")]
    AuthRevoked,
}

/// A push source of raw sensor snapshots.
#[async_trait]
pub trait DataSource: Send + Sync {
    // ---
    /// Make sure the process holds a session with the source. Callers treat
    /// failure as non-fatal and subscribe anyway.
    async fn ensure_anonymous_session(&self) -> Result<(), SourceError>;

    /// Open a subscription at `path`. The returned stream yields the whole
    /// value at `path` every time it changes, `Value::Null` meaning no data.
    async fn subscribe(&self, path: &str) -> Result<PayloadStream, SourceError>;
}
