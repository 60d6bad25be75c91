//! Data models for the sensor feed.

use serde::Serialize;

// ---

/// Alert state as reported by the device. Only `critical` is meaningful;
/// every other value collapses to `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    #[default]
    None,
}

/// Leaf colour classification reported by the plant camera.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum LeafColor {
    Green,
    Yellow,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

/// Normalized sensor reading.
///
/// Only ever built whole by the coercer: a record with no usable
/// `received_at_ms` never becomes a `SensorReading`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    // ---
    pub received_at_ms: i64,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub light_lux: f64,
    pub soil_pct: f64,
    pub led_on: bool,
    /// Raw rain sensor level as reported. The sensor pulls low when wet, so
    /// only an exact `0` means rain.
    pub rain_flag: f64,
    pub button_pressed: bool,
    pub source_ts_ms: i64,
    pub alert_severity: AlertSeverity,
    pub alert_reasons: Vec<String>,
    pub leaf_color: LeafColor,
}

impl SensorReading {
    // ---
    pub fn rain_detected(&self) -> bool {
        self.rain_flag == 0.0
    }

    pub fn is_critical(&self) -> bool {
        self.alert_severity == AlertSeverity::Critical
    }
}

/// One chart sample derived from a [`SensorReading`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    // ---
    /// Local wall-clock label, e.g. `03:45 PM`.
    pub time: String,
    pub temperature: f64,
    pub humidity: f64,
    pub light: f64,
    pub soil: f64,
}

/// What the presentation layer sees: the latest reading plus a trailing
/// window of chart points, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineResult {
    // ---
    pub current: Option<SensorReading>,
    pub history: Vec<HistoryPoint>,
}

impl PipelineResult {
    /// The "no data" state published before the first snapshot and after
    /// any subscription failure.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.history.is_empty()
    }
}
