//! Snapshot reduction: a whole pushed payload in, a time-ordered list of
//! valid readings out.

use serde_json::Value;
use tracing::debug;

use super::coerce::try_coerce_keyed;
use crate::models::SensorReading;

// ---

/// Coerce every record in `raw`, drop the ones that fail, and sort the rest
/// by their full-precision `rt_ms` (stable, so equal timestamps keep input
/// order). Sub-millisecond differences still decide the order even though
/// `received_at_ms` itself is truncated.
///
/// A sequence has its falsy entries removed first; a mapping contributes its
/// values in enumeration order and its keys are ignored. Any other shape,
/// including `null`, is an empty snapshot.
pub fn reduce(raw: &Value) -> Vec<SensorReading> {
    // ---
    let entries: Vec<&Value> = match raw {
        Value::Array(items) => items.iter().filter(|v| !is_falsy(v)).collect(),
        Value::Object(map) => map.values().collect(),
        Value::Null => return Vec::new(),
        other => {
            debug!("Ignoring snapshot of unexpected shape: {}", other);
            return Vec::new();
        }
    };

    let total = entries.len();
    let mut keyed: Vec<(f64, SensorReading)> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(i, entry)| match try_coerce_keyed(entry) {
            Ok(pair) => Some(pair),
            Err(rejection) => {
                debug!("Dropping record {}: {}", i, rejection);
                None
            }
        })
        .collect();

    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
    let readings: Vec<SensorReading> = keyed.into_iter().map(|(_, reading)| reading).collect();

    debug!("Reduced snapshot: {} of {} records valid", readings.len(), total);
    readings
}

fn is_falsy(value: &Value) -> bool {
    // ---
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}
