//! Client for the upstream delay service.
//!
//! The upstream exposes the live departure feed as server-sent events and
//! three JSON queries for historical data:
//!
//! - `GET /events` - station update stream
//! - `GET /line_delay` - one line's stations and buckets for a day and direction
//! - `GET /global_delay` - every station's buckets for a day
//! - `GET /station_stats` - aggregate statistics of one station
//!
//! [`run_live_feed`] connects to the stream and drives a [`LiveState`] from it.
//!
//! [`LiveState`]: crate::live::LiveState

use chrono::{NaiveDate, Utc};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ObserverError, Result};
use crate::history::DelaySource;
use crate::live::SharedLiveState;
use crate::model::{ChartSettings, Direction, Line, StationBucketList, StationStats};
use crate::sse::SseDecoder;

/// Default upstream base URL.
pub const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8080/api";

/// Parameters of a line delay query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDelayQuery {
    pub date: NaiveDate,
    pub direction: Direction,
    pub interval: u32,
    pub line: Line,
    pub realtime: bool,
    pub threshold: u32,
}

impl LineDelayQuery {
    pub fn from_settings(settings: &ChartSettings, direction: Direction) -> Self {
        Self {
            date: settings.date,
            direction,
            interval: settings.interval,
            line: settings.line,
            realtime: settings.realtime,
            threshold: settings.threshold,
        }
    }
}

/// Parameters of a global delay query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalDelayQuery {
    pub date: NaiveDate,
    pub interval: u32,
    pub realtime: bool,
    pub threshold: u32,
}

/// HTTP client for the upstream delay service.
#[derive(Clone)]
pub struct ObserverClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for ObserverClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverClient {
    /// Create a client for the default upstream.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_UPSTREAM_URL)
    }

    /// Create a client for a custom upstream, e.g. `https://example.org/api`.
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch one direction of a line for a day.
    ///
    /// An upstream `null` body is read as an empty list.
    pub async fn fetch_line_delay(&self, query: &LineDelayQuery) -> Result<Vec<StationBucketList>> {
        let url = format!(
            "{}/line_delay?south={}&date={}&interval={}&label={}&realtime={}&threshold={}",
            self.base_url,
            query.direction.south_flag(),
            query.date.format("%Y-%m-%d"),
            query.interval,
            urlencoding::encode(query.line.label()),
            u8::from(query.realtime),
            query.threshold
        );

        let data: Option<Vec<StationBucketList>> = self.get_json(&url).await?;
        Ok(data.unwrap_or_default())
    }

    /// Fetch every station's buckets for a day.
    pub async fn fetch_global_delay(
        &self,
        query: &GlobalDelayQuery,
    ) -> Result<Vec<StationBucketList>> {
        let url = format!(
            "{}/global_delay?date={}&interval={}&realtime={}&threshold={}",
            self.base_url,
            query.date.format("%Y-%m-%d"),
            query.interval,
            u8::from(query.realtime),
            query.threshold
        );

        let data: Option<Vec<StationBucketList>> = self.get_json(&url).await?;
        Ok(data.unwrap_or_default())
    }

    /// Fetch aggregate statistics of a station, optionally bounded by dates (`YYYY-MM-DD`).
    pub async fn fetch_station_stats(
        &self,
        station: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<StationStats> {
        let mut url = format!(
            "{}/station_stats?station={}",
            self.base_url,
            urlencoding::encode(station)
        );
        if let Some(start) = start_date {
            url.push_str(&format!("&startDate={}", urlencoding::encode(start)));
        }
        if let Some(end) = end_date {
            url.push_str(&format!("&endDate={}", urlencoding::encode(end)));
        }

        self.get_json(&url).await
    }

    /// Open the live departure event stream.
    pub async fn subscribe(&self) -> Result<reqwest::Response> {
        let url = format!("{}/events", self.base_url);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        ensure_success(&response, &url)?;
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url = %url, "Querying upstream");
        let response = self.client.get(url).send().await?;
        ensure_success(&response, url)?;
        let data = response.json::<T>().await?;
        Ok(data)
    }
}

fn ensure_success(response: &reqwest::Response, url: &str) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ObserverError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

impl DelaySource for ObserverClient {
    async fn line_delay(&self, query: &LineDelayQuery) -> Result<Vec<StationBucketList>> {
        self.fetch_line_delay(query).await
    }

    async fn global_delay(&self, query: &GlobalDelayQuery) -> Result<Vec<StationBucketList>> {
        self.fetch_global_delay(query).await
    }
}

/// Counters reported when the live feed ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub applied: u64,
    pub dropped: u64,
}

/// Apply every station update from the upstream stream to `state`.
///
/// Malformed messages are logged and dropped one at a time. When the stream
/// ends or breaks, `state` is closed and keeps its stations.
pub async fn run_live_feed(client: &ObserverClient, state: SharedLiveState) -> Result<FeedSummary> {
    let response = match client.subscribe().await {
        Ok(response) => response,
        Err(e) => {
            state.write().await.close();
            return Err(e);
        }
    };
    info!(base_url = %client.base_url(), "Live feed connected");

    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut summary = FeedSummary::default();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "Live feed interrupted");
                break;
            }
        };

        for event in decoder.push(&chunk) {
            if !event.is_message() {
                continue;
            }

            let mut live = state.write().await;
            match live.apply_payload(&event.data, Utc::now()) {
                Ok(station) => {
                    summary.applied += 1;
                    debug!(
                        station = %station.friendly_name(),
                        avg_delay = station.avg_delay(),
                        "Applied station update"
                    );
                }
                Err(e) => {
                    summary.dropped += 1;
                    warn!(error = %e, "Dropped station update");
                }
            }
        }
    }

    state.write().await.close();
    info!(
        applied = summary.applied,
        dropped = summary.dropped,
        "Live feed closed"
    );

    Ok(summary)
}
