//! Normalization pipeline for pushed sensor snapshots.
//!
//! Gateway for the three stages (EMBP): callers use [`run`] or the
//! re-exported stage functions and never reach into the submodules.
//!
//! ```text
//! raw snapshot ──► reduce (coerce each, drop invalid, sort) ──► select (latest + window)
//! ```
//!
//! Every stage is pure: the same snapshot always produces the same
//! [`PipelineResult`](crate::models::PipelineResult), given a fixed time zone
//! for the history labels.

use chrono::TimeZone;
use serde_json::Value;

use crate::models::PipelineResult;

mod coerce;
mod reduce;
mod window;

pub use coerce::{coerce, coerce_number, coerce_str, try_coerce, try_coerce_str, Rejection};
pub use reduce::reduce;
pub use window::{select, select_in, time_label, HISTORY_LIMIT};

// ---

/// Run a full snapshot through the pipeline, labelling history in local time.
pub fn run(raw: &Value) -> PipelineResult {
    select(reduce(raw))
}

/// Run a full snapshot through the pipeline with an explicit label time zone.
pub fn run_in<Tz>(raw: &Value, tz: &Tz) -> PipelineResult
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    select_in(reduce(raw), tz)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Map};

    #[test]
    fn test_null_snapshot() {
        // ---
        let result = run_in(&Value::Null, &Utc);
        assert!(result.current.is_none());
        assert!(result.history.is_empty());
    }

    #[test]
    fn test_thirty_record_mapping() {
        // ---
        let mut snapshot = Map::new();
        for i in 0..30i64 {
            snapshot.insert(
                format!("key-{i:02}"),
                json!({ "rt_ms": 1_000 + i * 60_000, "pi_temp": i }),
            );
        }
        let result = run_in(&Value::Object(snapshot), &Utc);

        assert_eq!(result.history.len(), 24);
        let temps: Vec<f64> = result.history.iter().map(|p| p.temperature).collect();
        let expected: Vec<f64> = (6..30).map(|i| i as f64).collect();
        assert_eq!(temps, expected);

        let current = result.current.unwrap();
        assert_eq!(current.received_at_ms, 1_000 + 29 * 60_000);
    }

    #[test]
    fn test_current_is_latest_valid() {
        // ---
        let raw = json!([
            { "rt_ms": 500, "soil": 5 },
            { "rt_ms": "oops", "soil": 99 },
            { "rt_ms": 100, "soil": 1 }
        ]);
        let result = run_in(&raw, &Utc);
        assert_eq!(result.current.unwrap().soil_pct, 5.0);
        assert_eq!(result.history.len(), 2);
    }

    #[test]
    fn test_current_decided_by_fractional_timestamp() {
        // ---
        let raw = json!([
            { "rt_ms": 1000.7, "soil": 7 },
            { "rt_ms": 1000.2, "soil": 2 }
        ]);
        let result = run_in(&raw, &Utc);
        assert_eq!(result.current.unwrap().soil_pct, 7.0);
        assert_eq!(result.history[1].soil, 7.0);
    }

    #[test]
    fn test_idempotent() {
        // ---
        let raw = json!({
            "a": { "rt_ms": 3, "alert_reasons": { "x": "too hot" } },
            "b": r#"{"rt_ms": 1, "led": 1}"#,
            "c": { "rt_ms": 2, "pi-temp": "18" }
        });
        assert_eq!(run_in(&raw, &Utc), run_in(&raw, &Utc));
    }
}
