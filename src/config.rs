//! Configuration loader for the `sensorfeed` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Everything is validated here so that a bad value
//! stops the process at startup instead of surfacing as a dead feed later.
use std::env;

use anyhow::{anyhow, bail, Result};
use reqwest::Url;

use crate::source::firebase::{DEFAULT_AUTH_BASE_URL, DEFAULT_TOKEN_BASE_URL};

/// Default realtime-database path holding the merged sensor records.
pub const DEFAULT_SENSOR_DATA_PATH: &str = "sensor_data/merged";

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u16 {
    ($lookup:expr, $var_name:expr, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.parse::<u16>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required, non-empty string environment variable.
macro_rules! require_env {
    ($lookup:expr, $var_name:expr) => {
        $lookup($var_name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Realtime database base URL, e.g. `https://demo.firebaseio.com`.
    pub database_url: String,

    /// Web API key used for anonymous sign-in.
    pub api_key: String,

    /// Database path the feed follows.
    pub sensor_data_path: String,

    /// Identity toolkit base URL.
    pub auth_base_url: String,

    /// Secure token base URL, used to refresh expired ID tokens.
    pub token_base_url: String,

    /// Port the HTTP read surface listens on.
    pub http_port: u16,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `FIREBASE_DATABASE_URL` – realtime database URL (http or https)
/// - `FIREBASE_API_KEY` – web API key
///
/// Optional:
/// - `SENSOR_DATA_PATH` – path to follow (default: `sensor_data/merged`)
/// - `AUTH_BASE_URL` – identity endpoint (default: Google identity toolkit)
/// - `TOKEN_BASE_URL` – token refresh endpoint (default: Google secure token)
/// - `HTTP_PORT` – listen port (default: 8080)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    load_from(|name| env::var(name).ok())
}

/// Same as [`load_from_env`] with an arbitrary variable lookup.
pub fn load_from<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let database_url = require_env!(lookup, "FIREBASE_DATABASE_URL");
    let api_key = require_env!(lookup, "FIREBASE_API_KEY");
    let sensor_data_path =
        lookup("SENSOR_DATA_PATH").unwrap_or_else(|| DEFAULT_SENSOR_DATA_PATH.to_string());
    let auth_base_url =
        lookup("AUTH_BASE_URL").unwrap_or_else(|| DEFAULT_AUTH_BASE_URL.to_string());
    let token_base_url =
        lookup("TOKEN_BASE_URL").unwrap_or_else(|| DEFAULT_TOKEN_BASE_URL.to_string());
    let http_port = parse_env_u16!(lookup, "HTTP_PORT", 8080);

    validate_http_url("FIREBASE_DATABASE_URL", &database_url)?;
    validate_http_url("AUTH_BASE_URL", &auth_base_url)?;
    validate_http_url("TOKEN_BASE_URL", &token_base_url)?;
    if sensor_data_path.trim_matches('/').is_empty() {
        bail!("SENSOR_DATA_PATH must name a database path");
    }

    Ok(Config {
        database_url,
        api_key,
        sensor_data_path,
        auth_base_url,
        token_base_url,
        http_port,
    })
}

fn validate_http_url(name: &str, value: &str) -> Result<()> {
    // ---
    let url = Url::parse(value).map_err(|e| anyhow!("{} must be a valid URL: {}", name, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => bail!("{} must use http or https, got {}", name, other),
    }
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the API key while showing all other configuration values that
    /// were loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  FIREBASE_DATABASE_URL : {}", self.database_url);
        tracing::info!("  FIREBASE_API_KEY      : {}", mask(&self.api_key));
        tracing::info!("  SENSOR_DATA_PATH      : {}", self.sensor_data_path);
        tracing::info!("  AUTH_BASE_URL         : {}", self.auth_base_url);
        tracing::info!("  TOKEN_BASE_URL        : {}", self.token_base_url);
        tracing::info!("  HTTP_PORT             : {}", self.http_port);
    }
}

/// Keep the last four characters of a secret.
fn mask(secret: &str) -> String {
    // ---
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}
