//! Application entry point for the `sensorfeed` service.
//!
//! This binary is the composition root. It:
//! - Loads configuration from environment variables or `.env`
//! - Initializes structured logging/tracing
//! - Builds the one realtime-database connection for the process
//! - Attaches the sensor feed to the configured path
//! - Mounts the HTTP read surface via the `routes` gateway (EMBP)
//! - Binds the Axum HTTP server and serves until Ctrl-C, then detaches
//!
//! # Environment Variables
//! - `FIREBASE_DATABASE_URL` (**required**) – realtime database URL
//! - `FIREBASE_API_KEY` (**required**) – web API key for anonymous sign-in
//! - `SENSOR_DATA_PATH`, `AUTH_BASE_URL`, `TOKEN_BASE_URL`, `HTTP_PORT` (optional)
//! - `SENSORFEED_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `SENSORFEED_SPAN_EVENTS` (optional) – span event mode for tracing
use std::{env, net::SocketAddr, sync::Arc};

use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

use sensorfeed::source::FirebaseSource;
use sensorfeed::{config, routes, DataSource, SensorFeed};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let source: Arc<dyn DataSource> = Arc::new(FirebaseSource::with_endpoints(
        &cfg.database_url,
        &cfg.api_key,
        &cfg.auth_base_url,
        &cfg.token_base_url,
    ));

    tracing::info!("Attaching sensor feed to /{}", cfg.sensor_data_path);
    let feed = SensorFeed::attach(source, cfg.sensor_data_path.clone());

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(feed.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    feed.detach();
    tracing::info!("Sensor feed detached, exiting");
    Ok(())
}

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `SENSORFEED_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level from `RUST_LOG`, else the `SENSORFEED_LOG_LEVEL` env var
///
/// Called once at startup before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("SENSORFEED_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to SENSORFEED_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("SENSORFEED_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},hyper=warn,reqwest=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
