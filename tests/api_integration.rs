//! Integration tests for the MVG Observer API.
//!
//! A small axum app bound to an ephemeral port plays the upstream delay
//! service; the observer's router is exercised through `axum-test`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::Query,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use axum_test::TestServer;
use chrono::{NaiveDate, Utc};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};

use mvg_observer::api::{AppState, router};
use mvg_observer::client::{ObserverClient, run_live_feed};
use mvg_observer::history::HistorySession;
use mvg_observer::live::{LiveState, SharedLiveState};
use mvg_observer::model::{ChartSettings, Line};
use mvg_observer::reconcile::day_bounds;

const EVENT_STREAM: &str = concat!(
    ": connected\n\n",
    "data: {\"station\":\"de:09162:2\",\"friendlyName\":\"Marienplatz\",",
    "\"coordinates\":{\"longitude\":\"11.5755\",\"latitude\":\"48.1374\"},",
    "\"departures\":[{\"plannedDepartureTime\":1718402100000,\"realtimeDepartureTime\":1718402340000,",
    "\"label\":\"U3\",\"delayInMinutes\":4,\"destination\":\"Fürstenried West\",",
    "\"occupancy\":\"LOW\",\"messages\":[],\"realtime\":true}]}\n\n",
    "data: {\"station\":\"broken\"}\n\n",
    "data: {\"station\":\"de:09162:1\",\"friendlyName\":\"Karlsplatz (Stachus)\",",
    "\"coordinates\":{\"longitude\":\"11.5650\",\"latitude\":\"48.1390\"},\"departures\":[]}\n\n",
);

async fn line_delay(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    if params.get("south").map(String::as_str) == Some("1") {
        return Json(Value::Null);
    }
    Json(json!([{
        "station": "de:09162:2",
        "name": "Marienplatz",
        "stop": 0,
        "coordinates": {"longitude": "11.5755", "latitude": "48.1374"},
        "buckets": [
            {"bucket": "2024-06-15 00:15:00", "avgDelay": "2.5", "numDepartures": "4", "percentageThreshold": "25"}
        ]
    }]))
}

async fn global_delay() -> Json<Value> {
    Json(json!([
        {
            "station": "de:09162:2",
            "name": "Marienplatz (upstream)",
            "stop": 0,
            "buckets": [{"bucket": "2024-06-15 00:15:00", "avgDelay": "7.5", "numDepartures": "2"}]
        },
        {
            "station": "de:09162:70",
            "name": "Odeonsplatz",
            "stop": 1,
            "buckets": [{"bucket": "2024-06-15 00:30:00", "avgDelay": "1.0", "numDepartures": "2"}]
        }
    ]))
}

async fn station_stats(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    if params.get("station").map(String::as_str) != Some("de:09162:2") {
        return (StatusCode::INTERNAL_SERVER_ERROR, "no data").into_response();
    }
    Json(json!({
        "avgDelay": 1.5,
        "totalDepartures": 1200,
        "delayPercentage": 12.5,
        "monthlyStats": [{"month": "2024-06", "avgDelay": 1.5, "departures": 1200,
                          "lineStats": {"U3": {"avgDelay": 2.0, "departures": 600}}}],
        "hourlyStats": [{"hour": 8, "avgDelay": 3.0, "departures": 100, "lineStats": {}}],
        "delayDistribution": [{"range": "0-1 min", "count": 900}]
    }))
    .into_response()
}

async fn events() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/event-stream")], EVENT_STREAM)
}

/// Serve `app` on an ephemeral port and return its base URL.
async fn spawn_upstream(app: Router) -> String {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api", addr)
}

async fn healthy_upstream() -> String {
    spawn_upstream(
        Router::new()
            .route("/api/line_delay", get(line_delay))
            .route("/api/global_delay", get(global_delay))
            .route("/api/station_stats", get(station_stats))
            .route("/api/events", get(events)),
    )
    .await
}

async fn failing_upstream() -> String {
    spawn_upstream(Router::new().fallback(|| async { StatusCode::INTERNAL_SERVER_ERROR })).await
}

fn create_test_server(
    base_url: &str,
    live: SharedLiveState,
    history: Option<HistorySession>,
) -> TestServer {
    let state = AppState {
        live,
        client: ObserverClient::with_base_url(base_url),
        history,
        stale_after: chrono::Duration::minutes(5),
    };
    TestServer::new(router(state)).unwrap()
}

async fn populated_live_state() -> SharedLiveState {
    let live = LiveState::shared();
    {
        let mut state = live.write().await;
        state
            .apply_payload(
                r#"{"station": "de:09162:2", "friendlyName": "Marienplatz",
                    "coordinates": {"longitude": "11.5755", "latitude": "48.1374"},
                    "departures": [
                        {"plannedDepartureTime": 1718402100000, "realtimeDepartureTime": 1718402460000,
                         "label": "U6", "delayInMinutes": 6, "destination": "Garching, Forschungszentrum"},
                        {"plannedDepartureTime": 1718402400000, "realtimeDepartureTime": 1718402400000,
                         "label": "U3", "delayInMinutes": 0, "destination": "Moosach"}
                    ]}"#,
                Utc::now(),
            )
            .unwrap();
        state
            .apply_payload(
                r#"{"station": "de:09162:70", "friendlyName": "Odeonsplatz",
                    "coordinates": {"longitude": "11.5773", "latitude": "48.1427"},
                    "departures": [
                        {"plannedDepartureTime": 1718402200000, "realtimeDepartureTime": 1718402200000,
                         "label": "U5", "delayInMinutes": 0, "destination": "Neuperlach Süd"}
                    ]}"#,
                Utc::now(),
            )
            .unwrap();
    }
    live
}

fn june_15_start() -> i64 {
    day_bounds(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap())
        .unwrap()
        .0
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = create_test_server("http://127.0.0.1:9", LiveState::shared(), None);

    server.get("/health").await.assert_status_ok();
}

#[tokio::test]
async fn test_stations_sorted_by_name() {
    let server = create_test_server("http://127.0.0.1:9", populated_live_state().await, None);

    let response = server.get("/stations").await;
    response.assert_status_ok();

    let body: Value = response.json();
    let stations = body.as_array().unwrap();
    assert_eq!(stations.len(), 2);
    assert_eq!(stations[0]["friendlyName"], "Marienplatz");
    assert_eq!(stations[0]["id"], "de:09162:2");
    assert_eq!(stations[0]["avgDelay"], 3.0);
    assert_eq!(stations[0]["tier"], "warning");
    assert_eq!(
        stations[0]["departures"][0]["id"],
        "u6-1718402100000-garching,-forschungszentrum"
    );
    assert_eq!(stations[1]["friendlyName"], "Odeonsplatz");
    assert_eq!(stations[1]["tier"], "good");
}

#[tokio::test]
async fn test_station_by_id() {
    let server = create_test_server("http://127.0.0.1:9", populated_live_state().await, None);

    let response = server.get("/stations/de:09162:70").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["departures"].as_array().unwrap().len(), 1);

    server
        .get("/stations/unknown")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_global_delay() {
    let server = create_test_server("http://127.0.0.1:9", populated_live_state().await, None);

    let response = server.get("/delay").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["globalDelay"], 2.0);
    assert_eq!(body["formatted"], "2m");
    assert_eq!(body["tier"], "warning");
    assert_eq!(body["rating"], "okay");
    assert_eq!(body["stationCount"], 2);
    assert_eq!(body["mostDelayedStation"]["id"], "de:09162:2");
    assert_eq!(body["updatedStation"], "de:09162:70");
    assert!(body["staleStations"].as_array().unwrap().is_empty());
    assert_eq!(body["feedClosed"], false);
}

#[tokio::test]
async fn test_global_delay_empty() {
    let server = create_test_server("http://127.0.0.1:9", LiveState::shared(), None);

    let body: Value = server.get("/delay").await.json();
    assert_eq!(body["globalDelay"], 0.0);
    assert_eq!(body["rating"], "very_good");
    assert!(body["mostDelayedStation"].is_null());
}

#[tokio::test]
async fn test_live_feed_applies_stream_and_closes() {
    let base_url = healthy_upstream().await;
    let live = LiveState::shared();
    let client = ObserverClient::with_base_url(&base_url);

    let summary = assert_ok!(run_live_feed(&client, live.clone()).await);

    assert_eq!(summary.applied, 2);
    assert_eq!(summary.dropped, 1);
    {
        let state = live.read().await;
        assert!(state.is_closed());
        assert_eq!(state.stations().len(), 2);
        assert_eq!(state.global_delay(), 4.0);
        assert_eq!(state.station("de:09162:1").unwrap().avg_delay(), 0.0);
    }

    let server = create_test_server(&base_url, live, None);
    let body: Value = server.get("/delay").await.json();
    assert_eq!(body["feedClosed"], true);
    assert_eq!(body["stationCount"], 2);
}

#[tokio::test]
async fn test_live_feed_upstream_error() {
    let base_url = failing_upstream().await;
    let live = LiveState::shared();

    assert_err!(run_live_feed(&ObserverClient::with_base_url(&base_url), live.clone()).await);
    assert!(live.read().await.is_closed());
}

#[tokio::test]
async fn test_line_history_is_gap_filled() {
    let base_url = healthy_upstream().await;
    let server = create_test_server(&base_url, LiveState::shared(), None);

    let response = server
        .get("/history/line?date=2024-06-15&line=U3&interval=15&realtime=true&threshold=3")
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["hasData"], true);
    assert_eq!(body["settings"]["line"], "U3");
    assert!(body["south"].as_array().unwrap().is_empty());

    let buckets = body["north"][0]["buckets"].as_array().unwrap();
    assert_eq!(buckets.len(), 97);
    assert_eq!(buckets[1]["bucket"], june_15_start() + 15 * 60_000);
    assert_eq!(buckets[1]["avgDelay"], "2.5");
    assert_eq!(buckets[1]["percentageThreshold"], "25");
    assert!(buckets[0]["avgDelay"].is_null());
    assert!(buckets[0]["numDepartures"].is_null());
    assert_eq!(
        buckets.iter().filter(|b| b["avgDelay"].is_null()).count(),
        96
    );
}

#[tokio::test]
async fn test_line_history_rejects_bad_parameters() {
    let server = create_test_server("http://127.0.0.1:9", LiveState::shared(), None);

    server
        .get("/history/line?date=15.06.2024&line=U3")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .get("/history/line?date=2024-06-15&line=S8")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_line_history_upstream_failure() {
    let base_url = failing_upstream().await;
    let server = create_test_server(&base_url, LiveState::shared(), None);

    server
        .get("/history/line?date=2024-06-15&line=U3")
        .await
        .assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_map_history_snapshot() {
    let base_url = healthy_upstream().await;
    let server = create_test_server(&base_url, populated_live_state().await, None);

    // 00:20 rounds down to the 00:15 interval.
    let response = server
        .get("/history/map?date=2024-06-15&time=00:20&interval=15")
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["at"], june_15_start() + 15 * 60_000);
    let stations = body["stations"].as_array().unwrap();
    assert_eq!(stations.len(), 1);
    assert_eq!(stations[0]["station"], "de:09162:2");
    // The live name wins over the upstream one.
    assert_eq!(stations[0]["friendlyName"], "Marienplatz");
    assert_eq!(stations[0]["avgDelay"], 7.5);
    assert_eq!(stations[0]["tier"], "critical");

    server
        .get("/history/map?date=2024-06-15&time=later")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_station_stats_proxy() {
    let base_url = healthy_upstream().await;
    let server = create_test_server(&base_url, LiveState::shared(), None);

    let response = server
        .get("/stations/de:09162:2/stats?startDate=2024-06-01&endDate=2024-07-01")
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["totalDepartures"], 1200);
    assert_eq!(body["monthlyStats"][0]["lineStats"]["U3"]["departures"], 600);
    assert_eq!(body["delayDistribution"][0]["count"], 900);

    server
        .get("/stations/de:09162:99/stats")
        .await
        .assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_history_session_endpoints() {
    let base_url = healthy_upstream().await;
    let initial = ChartSettings {
        date: NaiveDate::from_ymd_opt(2024, 6, 14).unwrap(),
        interval: 60,
        line: Line::U3,
        ..ChartSettings::default()
    };
    let session = HistorySession::start(
        std::sync::Arc::new(ObserverClient::with_base_url(&base_url)),
        initial,
        Duration::from_millis(20),
    );
    let server = create_test_server(&base_url, LiveState::shared(), Some(session));

    server
        .put("/history/settings")
        .json(&json!({"date": "2024-06-15", "interval": 15, "line": "U6"}))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let settings: Value = server.get("/history/settings").await.json();
    assert_eq!(settings["line"], "U6");

    let mut chart = Value::Null;
    for _ in 0..100 {
        let response = server.get("/history/chart").await;
        if response.status_code() == StatusCode::OK {
            let body: Value = response.json();
            if body["settings"]["date"] == "2024-06-15" {
                chart = body;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(chart["settings"]["line"], "U6");
    assert_eq!(chart["generation"], 2);
    assert_eq!(chart["north"][0]["buckets"].as_array().unwrap().len(), 97);
}

#[tokio::test]
async fn test_history_session_not_configured() {
    let server = create_test_server("http://127.0.0.1:9", LiveState::shared(), None);

    server
        .get("/history/chart")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    server
        .put("/history/settings")
        .json(&json!({"date": "2024-06-15", "interval": 15, "line": "U1"}))
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}
