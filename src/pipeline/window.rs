//! Window selection: the latest reading plus a bounded trailing history
//! projected into chart points.

use chrono::{DateTime, Local, TimeZone};

use crate::models::{HistoryPoint, PipelineResult, SensorReading};

// ---

/// Maximum number of history points handed to the presentation layer.
pub const HISTORY_LIMIT: usize = 24;

/// `hh:mm AM/PM`, two-digit hour.
const TIME_LABEL_FORMAT: &str = "%I:%M %p";

/// Label used when a timestamp is outside the representable range.
const INVALID_TIME_LABEL: &str = "--:--";

/// Build a [`PipelineResult`] from readings already sorted by time, labelling
/// history points in the host's local time zone.
pub fn select(sorted: Vec<SensorReading>) -> PipelineResult {
    select_in(sorted, &Local)
}

/// Same as [`select`] with an explicit time zone for the labels.
pub fn select_in<Tz>(mut sorted: Vec<SensorReading>, tz: &Tz) -> PipelineResult
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    // ---
    let start = sorted.len().saturating_sub(HISTORY_LIMIT);
    let history = sorted[start..]
        .iter()
        .map(|reading| to_history_point(reading, tz))
        .collect();

    PipelineResult {
        current: sorted.pop(),
        history,
    }
}

fn to_history_point<Tz>(reading: &SensorReading, tz: &Tz) -> HistoryPoint
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    // ---
    HistoryPoint {
        time: time_label(reading.received_at_ms, tz),
        temperature: reading.temperature_c,
        humidity: reading.humidity_pct,
        light: reading.light_lux,
        soil: reading.soil_pct,
    }
}

/// Format epoch milliseconds as a wall-clock label in `tz`.
pub fn time_label<Tz>(ms: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    // ---
    match DateTime::from_timestamp_millis(ms) {
        Some(utc) => utc.with_timezone(tz).format(TIME_LABEL_FORMAT).to_string(),
        None => INVALID_TIME_LABEL.to_string(),
    }
}
