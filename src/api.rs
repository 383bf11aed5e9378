//! HTTP API handlers for MVG Observer.
//!
//! - **Live**: `GET /stations`, `GET /stations/:id` and `GET /delay` read the
//!   reducer's current state. They never touch the upstream service.
//! - **History**: `GET /history/line`, `GET /history/map` and
//!   `GET /stations/:id/stats` query the upstream service and return
//!   chart-ready data. Upstream failures surface as `502 Bad Gateway`.
//! - **Session**: `PUT /history/settings` and `GET /history/chart` drive the
//!   debounced history session.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{Local, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::client::{GlobalDelayQuery, ObserverClient};
use crate::history::{HistorySession, MapStation, fetch_line_chart, map_snapshot};
use crate::live::SharedLiveState;
use crate::model::{
    ChartSettings, DelayTier, Line, NetworkRating, ReconciledStation, Station, StationStats,
    format_delay,
};
use crate::reconcile::day_bounds;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub live: SharedLiveState,
    pub client: ObserverClient,
    pub history: Option<HistorySession>,
    /// Stations older than this are listed as stale by `GET /delay`.
    pub stale_after: chrono::Duration,
}

/// Build the router with every route of the API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stations", get(list_stations))
        .route("/stations/:id", get(get_station))
        .route("/stations/:id/stats", get(get_station_stats))
        .route("/delay", get(get_global_delay))
        .route("/history/line", get(get_line_history))
        .route("/history/map", get(get_map_history))
        .route(
            "/history/settings",
            get(get_history_settings).put(put_history_settings),
        )
        .route("/history/chart", get(get_history_chart))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

// ============================================================================
// Live views
// ============================================================================

/// A live station together with its id and delay tier.
#[derive(Debug, Clone, Serialize)]
pub struct StationView {
    pub id: String,
    pub tier: DelayTier,
    #[serde(flatten)]
    pub station: Station,
}

impl StationView {
    fn new(id: &str, station: &Station) -> Self {
        Self {
            id: id.to_string(),
            tier: DelayTier::from_delay(station.avg_delay()),
            station: station.clone(),
        }
    }
}

/// GET /stations - All live stations, sorted by name.
#[instrument(skip(state))]
pub async fn list_stations(State(state): State<AppState>) -> Json<Vec<StationView>> {
    let live = state.live.read().await;
    let stations = live
        .sorted_by_name()
        .into_iter()
        .map(|(id, station)| StationView::new(id, station))
        .collect();
    Json(stations)
}

/// GET /stations/:id - One live station.
#[instrument(skip(state))]
pub async fn get_station(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StationView>, StatusCode> {
    let live = state.live.read().await;
    live.station(&id)
        .map(|station| Json(StationView::new(&id, station)))
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MostDelayedStation {
    pub id: String,
    pub friendly_name: String,
    pub avg_delay: f64,
    pub formatted: String,
}

/// Response for GET /delay.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalDelayResponse {
    pub global_delay: f64,
    pub formatted: String,
    pub tier: DelayTier,
    pub rating: NetworkRating,
    pub station_count: usize,
    pub most_delayed_station: Option<MostDelayedStation>,
    pub updated_station: Option<String>,
    pub stale_stations: Vec<String>,
    pub feed_closed: bool,
}

/// GET /delay - Network-wide average delay and the worst station.
#[instrument(skip(state))]
pub async fn get_global_delay(State(state): State<AppState>) -> Json<GlobalDelayResponse> {
    let live = state.live.read().await;
    let global_delay = live.global_delay();

    let most_delayed_station = live
        .most_delayed_station()
        .map(|(id, station)| MostDelayedStation {
            id: id.to_string(),
            friendly_name: station.friendly_name().to_string(),
            avg_delay: station.avg_delay(),
            formatted: format_delay(station.avg_delay()),
        });

    Json(GlobalDelayResponse {
        global_delay,
        formatted: format_delay(global_delay),
        tier: DelayTier::from_delay(global_delay),
        rating: NetworkRating::from_global_delay(global_delay),
        station_count: live.stations().len(),
        most_delayed_station,
        updated_station: live.updated_station().map(str::to_string),
        stale_stations: live
            .stale_stations(Utc::now(), state.stale_after)
            .into_iter()
            .map(str::to_string)
            .collect(),
        feed_closed: live.is_closed(),
    })
}

// ============================================================================
// History views
// ============================================================================

fn default_interval() -> u32 {
    30
}

fn default_threshold() -> u32 {
    2
}

/// Query parameters for GET /stations/:id/stats.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationStatsQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// GET /stations/:id/stats - Aggregate statistics from the upstream service.
#[instrument(skip(state))]
pub async fn get_station_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StationStatsQuery>,
) -> Result<Json<StationStats>, StatusCode> {
    let start = query.start_date.map(|d| d.format("%Y-%m-%d").to_string());
    let end = query.end_date.map(|d| d.format("%Y-%m-%d").to_string());

    match state
        .client
        .fetch_station_stats(&id, start.as_deref(), end.as_deref())
        .await
    {
        Ok(stats) => {
            info!(
                station = %id,
                total_departures = stats.total_departures,
                "Station stats queried"
            );
            Ok(Json(stats))
        }
        Err(e) => {
            warn!(station = %id, error = %e, "Failed to fetch station stats");
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

/// Query parameters for GET /history/line.
#[derive(Debug, Deserialize)]
pub struct LineHistoryQuery {
    pub date: NaiveDate,
    pub line: Line,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub realtime: bool,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

/// Response for GET /history/line.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineHistoryResponse {
    pub settings: ChartSettings,
    /// Whether any slot in either direction carries data.
    pub has_data: bool,
    pub north: Vec<ReconciledStation>,
    pub south: Vec<ReconciledStation>,
}

/// GET /history/line - Both directions of a line, gap-filled over the day.
///
/// # Query Parameters
///
/// - `date` (required): `YYYY-MM-DD`
/// - `line` (required): `U1` .. `U8`
/// - `interval` (optional): bucket width in minutes (default: 30)
/// - `realtime` (optional): only live-tracked departures (default: false)
/// - `threshold` (optional): delay threshold in minutes (default: 2)
#[instrument(skip(state))]
pub async fn get_line_history(
    State(state): State<AppState>,
    Query(query): Query<LineHistoryQuery>,
) -> Result<Json<LineHistoryResponse>, StatusCode> {
    let settings = ChartSettings {
        date: query.date,
        interval: query.interval,
        realtime: query.realtime,
        line: query.line,
        threshold: query.threshold,
        ..ChartSettings::default()
    };
    if !settings.is_recognized_interval() {
        warn!(interval = settings.interval, "Unusual history interval");
    }

    match fetch_line_chart(&state.client, &settings, &Local).await {
        Ok((north, south)) => {
            let has_data = north
                .iter()
                .chain(south.iter())
                .flat_map(|s| s.buckets.iter())
                .any(|b| !b.is_placeholder());

            info!(
                date = %settings.date,
                line = %settings.line,
                north_stations = north.len(),
                south_stations = south.len(),
                has_data,
                "Line history queried"
            );
            Ok(Json(LineHistoryResponse {
                settings,
                has_data,
                north,
                south,
            }))
        }
        Err(e) => {
            warn!(date = %settings.date, line = %settings.line, error = %e, "Failed to fetch line history");
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

/// Query parameters for GET /history/map.
#[derive(Debug, Deserialize)]
pub struct MapHistoryQuery {
    pub date: NaiveDate,
    /// `HH:MM` within `date`.
    pub time: String,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub realtime: bool,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

/// Response for GET /history/map.
#[derive(Debug, Clone, Serialize)]
pub struct MapHistoryResponse {
    /// Start of the selected interval, ms since epoch.
    pub at: i64,
    pub stations: Vec<MapStation>,
}

fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// GET /history/map - Every station's delay at one interval of a day.
///
/// `time` is rounded down to the start of its interval.
#[instrument(skip(state))]
pub async fn get_map_history(
    State(state): State<AppState>,
    Query(query): Query<MapHistoryQuery>,
) -> Result<Json<MapHistoryResponse>, StatusCode> {
    let time = parse_time_of_day(&query.time).ok_or_else(|| {
        warn!(time = %query.time, "Invalid time of day");
        StatusCode::BAD_REQUEST
    })?;
    let (day_start, _) = day_bounds(query.date).ok_or(StatusCode::BAD_REQUEST)?;

    let minutes = i64::from(time.num_seconds_from_midnight() / 60);
    let interval = i64::from(query.interval.max(1));
    let at = day_start + (minutes - minutes % interval) * 60_000;

    let global = GlobalDelayQuery {
        date: query.date,
        interval: query.interval,
        realtime: query.realtime,
        threshold: query.threshold,
    };

    let buckets = state.client.fetch_global_delay(&global).await.map_err(|e| {
        warn!(date = %query.date, error = %e, "Failed to fetch global history");
        StatusCode::BAD_GATEWAY
    })?;

    let live = state.live.read().await;
    let stations = map_snapshot(&Local, &buckets, at, |id| {
        live.station(id).map(|s| s.friendly_name().to_string())
    });

    info!(date = %query.date, at, stations = stations.len(), "Map history queried");
    Ok(Json(MapHistoryResponse { at, stations }))
}

// ============================================================================
// History session
// ============================================================================

/// GET /history/settings - Current settings of the history session.
#[instrument(skip(state))]
pub async fn get_history_settings(
    State(state): State<AppState>,
) -> Result<Json<ChartSettings>, StatusCode> {
    let session = state.history.as_ref().ok_or_else(|| {
        warn!("History session not configured");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok(Json(session.settings()))
}

/// PUT /history/settings - Replace the settings; the fetch follows once changes settle.
#[instrument(skip(state))]
pub async fn put_history_settings(
    State(state): State<AppState>,
    Json(settings): Json<ChartSettings>,
) -> StatusCode {
    let Some(session) = state.history.as_ref() else {
        warn!("History session not configured");
        return StatusCode::SERVICE_UNAVAILABLE;
    };

    info!(date = %settings.date, line = %settings.line, "History settings updated");
    session.update(settings);
    StatusCode::ACCEPTED
}

/// GET /history/chart - Latest chart of the session, `204` before the first fetch lands.
#[instrument(skip(state))]
pub async fn get_history_chart(State(state): State<AppState>) -> Response {
    let Some(session) = state.history.as_ref() else {
        warn!("History session not configured");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    match session.chart() {
        Some(chart) => Json(chart).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
