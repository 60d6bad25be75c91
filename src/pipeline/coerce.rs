//! Record coercion: one loosely-typed record in, one strict [`SensorReading`]
//! (or nothing) out.
//!
//! Devices publish records with whatever types their firmware felt like that
//! day: numbers as strings, booleans as `"true"` or `1`, alert reasons as a
//! list, a keyed object or a bare string. Everything here is a total
//! function over [`serde_json::Value`]; nothing panics and nothing escapes
//! as an error except through [`Rejection`].

use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{AlertSeverity, LeafColor, SensorReading};

// ---

/// Why a record could not be turned into a [`SensorReading`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("record text is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("record is not an object (got {0})")]
    NotAnObject(&'static str),

    #[error("record has no usable `rt_ms` timestamp")]
    MissingTimestamp,
}

/// Coerce a raw record, returning `None` for anything unusable.
pub fn coerce(entry: &Value) -> Option<SensorReading> {
    try_coerce(entry).ok()
}

/// Coerce a raw record given as JSON text.
pub fn coerce_str(text: &str) -> Option<SensorReading> {
    try_coerce_str(text).ok()
}

pub fn try_coerce_str(text: &str) -> Result<SensorReading, Rejection> {
    coerce_object(&decode(text)?)
}

fn decode(text: &str) -> Result<Value, Rejection> {
    serde_json::from_str(text).map_err(|e| Rejection::MalformedJson(e.to_string()))
}

/// Same as [`coerce`] but reports why a record was refused.
///
/// A string entry is treated as a JSON-encoded record and decoded first.
pub fn try_coerce(entry: &Value) -> Result<SensorReading, Rejection> {
    try_coerce_keyed(entry).map(|(_, reading)| reading)
}

/// Coerce a record and also return its full-precision `rt_ms`.
///
/// `received_at_ms` is truncated to whole milliseconds; ordering has to use
/// the untruncated value so `1000.7` still sorts after `1000.2`.
pub(crate) fn try_coerce_keyed(entry: &Value) -> Result<(f64, SensorReading), Rejection> {
    // ---
    match entry {
        Value::String(text) => coerce_keyed(&decode(text)?),
        other => coerce_keyed(other),
    }
}

fn coerce_object(value: &Value) -> Result<SensorReading, Rejection> {
    coerce_keyed(value).map(|(_, reading)| reading)
}

fn coerce_keyed(value: &Value) -> Result<(f64, SensorReading), Rejection> {
    // ---
    let obj = value
        .as_object()
        .ok_or_else(|| Rejection::NotAnObject(shape_name(value)))?;

    // `+ 0.0` folds -0.0 into 0.0 so the two compare equal under total_cmp
    let rt_ms = number_field(obj, "rt_ms").ok_or(Rejection::MissingTimestamp)? + 0.0;

    let reading = SensorReading {
        received_at_ms: to_millis(rt_ms),
        temperature_c: number_field(obj, "pi_temp")
            .or_else(|| number_field(obj, "pi-temp"))
            .unwrap_or(0.0),
        humidity_pct: number_field(obj, "pi_hum")
            .or_else(|| number_field(obj, "pi-hum"))
            .unwrap_or(0.0),
        light_lux: number_field(obj, "lux").unwrap_or(0.0),
        soil_pct: number_field(obj, "soil").unwrap_or(0.0),
        led_on: coerce_flag(obj.get("led")),
        rain_flag: coerce_rain(obj.get("rain")),
        button_pressed: coerce_flag(obj.get("button_pressed")),
        source_ts_ms: number_field(obj, "ts_esp").map(to_millis).unwrap_or(0),
        alert_severity: coerce_severity(obj.get("alert_severity")),
        alert_reasons: coerce_reasons(obj.get("alert_reasons")),
        leaf_color: coerce_leaf_color(obj.get("leaf_color")),
    };
    Ok((rt_ms, reading))
}

// ---

/// Accept a JSON number, or a non-empty string that parses to a finite
/// number after trimming. Anything else has no value.
pub fn coerce_number(value: &Value) -> Option<f64> {
    // ---
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
        }
        _ => None,
    }
}

fn number_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    obj.get(key).and_then(coerce_number)
}

fn to_millis(value: f64) -> i64 {
    // `as` saturates at the i64 bounds
    value.trunc() as i64
}

fn coerce_flag(value: Option<&Value>) -> bool {
    // ---
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        Some(Value::Number(n)) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

/// Numbers pass through untouched; only the exact string `"1"` and `true`
/// stand in for a dry reading.
fn coerce_rain(value: Option<&Value>) -> f64 {
    // ---
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) if s == "1" => 1.0,
        Some(Value::Bool(true)) => 1.0,
        _ => 0.0,
    }
}

fn coerce_severity(value: Option<&Value>) -> AlertSeverity {
    // ---
    match value.and_then(Value::as_str) {
        Some("critical") => AlertSeverity::Critical,
        _ => AlertSeverity::None,
    }
}

fn coerce_reasons(value: Option<&Value>) -> Vec<String> {
    // ---
    fn strings<'a>(items: impl Iterator<Item = &'a Value>) -> Vec<String> {
        items
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect()
    }

    match value {
        Some(Value::Array(items)) => strings(items.iter()),
        Some(Value::Object(map)) => strings(map.values()),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn coerce_leaf_color(value: Option<&Value>) -> LeafColor {
    // ---
    match value.and_then(Value::as_str) {
        Some(s) if s.eq_ignore_ascii_case("green") => LeafColor::Green,
        Some(s) if s.eq_ignore_ascii_case("yellow") => LeafColor::Yellow,
        _ => LeafColor::Unknown,
    }
}

fn shape_name(value: &Value) -> &'static str {
    // ---
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
