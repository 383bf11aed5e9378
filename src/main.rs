//! MVG Observer - live and historical delays of the Munich U-Bahn.
//!
//! Connects to the upstream departure feed, keeps the live station state in
//! memory and serves it together with historical delay charts.
//!
//! # API Endpoints
//!
//! - `GET /stations` - Live stations sorted by name
//! - `GET /stations/:id` - One live station
//! - `GET /stations/:id/stats` - Aggregate statistics of a station
//! - `GET /delay` - Network-wide average delay
//! - `GET /history/line` - Gap-filled delay chart of a line
//! - `GET /history/map` - Station delays at one time of day
//! - `GET|PUT /history/settings` - Debounced history session settings
//! - `GET /history/chart` - Latest chart of the history session
//! - `GET /health` - Health check

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mvg_observer::api::{AppState, router};
use mvg_observer::client::{ObserverClient, run_live_feed};
use mvg_observer::config::Config;
use mvg_observer::history::HistorySession;
use mvg_observer::live::LiveState;
use mvg_observer::model::ChartSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("mvg_observer=info".parse()?))
        .init();

    let config = Config::from_env();
    info!(
        port = config.port,
        upstream = %config.upstream_url,
        debounce_ms = config.debounce.as_millis() as u64,
        "Starting MVG Observer"
    );

    let client = ObserverClient::with_base_url(&config.upstream_url);
    let live = LiveState::shared();

    // Sole writer of the live state.
    let feed_client = client.clone();
    let feed_state = Arc::clone(&live);
    tokio::spawn(async move {
        match run_live_feed(&feed_client, feed_state).await {
            Ok(summary) => info!(
                applied = summary.applied,
                dropped = summary.dropped,
                "Live feed ended; serving last known state"
            ),
            Err(e) => warn!(error = %e, "Live feed unavailable; serving last known state"),
        }
    });

    let history = HistorySession::start(
        Arc::new(client.clone()),
        ChartSettings::default(),
        config.debounce,
    );

    let state = AppState {
        live,
        client,
        history: Some(history),
        stale_after: config.stale_after,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "MVG Observer is listening");

    axum::serve(listener, router(state)).await?;

    Ok(())
}
