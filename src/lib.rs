//! Sensorfeed - normalizes a realtime stream of loosely-typed sensor records
//! into a "current reading + recent history" view.
//!
//! # Modules
//!
//! - [`models`]: strict reading, history point and result types
//! - [`pipeline`]: coercion, snapshot reduction and window selection
//! - [`source`]: the external push source and its realtime-database client
//! - [`feed`]: subscription adapter publishing results to listeners
//! - [`config`]: environment configuration
//! - [`routes`]: HTTP read surface

pub mod config;
pub mod feed;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod source;

pub use config::Config;

// Re-exported at the root so routes/*.rs and callers depend on the crate
// gateway rather than on individual module paths.
pub use feed::{SensorFeed, Unsubscribe};
pub use models::{AlertSeverity, HistoryPoint, LeafColor, PipelineResult, SensorReading};
pub use source::{DataSource, PayloadStream, SourceError};
