//! Data models for MVG Observer.
//!
//! Two families of types live here:
//!
//! - **Live** types decoded from the departure event feed ([`StationUpdate`],
//!   [`RawDeparture`]) and the derived view held by the reducer ([`Station`],
//!   [`Departure`]).
//! - **Historical** types returned by the delay history queries ([`Bucket`],
//!   [`StationBucketList`], [`StationStats`]) and their chart-ready
//!   counterparts ([`ChartBucket`], [`ReconciledStation`]).
//!
//! Feed payloads are validated once at the boundary; downstream code never
//! sees a partially-decoded station.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ObserverError, Result};

/// A U-Bahn line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Line {
    U1,
    U2,
    U3,
    U4,
    U5,
    U6,
    U7,
    U8,
}

impl Line {
    /// All lines in label order.
    pub const ALL: [Line; 8] = [
        Line::U1,
        Line::U2,
        Line::U3,
        Line::U4,
        Line::U5,
        Line::U6,
        Line::U7,
        Line::U8,
    ];

    /// The rider-facing label, e.g. `"U3"`.
    pub fn label(&self) -> &'static str {
        match self {
            Line::U1 => "U1",
            Line::U2 => "U2",
            Line::U3 => "U3",
            Line::U4 => "U4",
            Line::U5 => "U5",
            Line::U6 => "U6",
            Line::U7 => "U7",
            Line::U8 => "U8",
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Station coordinates as delivered by the feed (numeric strings).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(default)]
    pub longitude: String,
    #[serde(default)]
    pub latitude: String,
}

impl Coordinates {
    /// Parse into `(latitude, longitude)`.
    ///
    /// Returns `None` if either component is not a number.
    pub fn lat_lng(&self) -> Option<(f64, f64)> {
        let lat = self.latitude.trim().parse().ok()?;
        let lng = self.longitude.trim().parse().ok()?;
        Some((lat, lng))
    }
}

/// A departure as it arrives on the feed, before an id is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDeparture {
    /// Scheduled departure, ms since epoch.
    pub planned_departure_time: i64,

    /// Predicted departure, ms since epoch.
    pub realtime_departure_time: i64,

    pub label: Line,

    /// Realtime minus planned, in minutes.
    pub delay_in_minutes: f64,

    pub destination: String,

    /// Crowding level, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupancy: Option<String>,

    /// Rider-facing service messages.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub messages: Vec<String>,

    /// Whether the realtime timestamp is live-tracked or schedule-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realtime: Option<bool>,
}

/// A departure with its deterministic id attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Departure {
    /// Stable key derived from label, planned time and destination.
    pub id: String,
    pub planned_departure_time: i64,
    pub realtime_departure_time: i64,
    pub label: Line,
    pub delay_in_minutes: f64,
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupancy: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime: Option<bool>,
}

impl From<RawDeparture> for Departure {
    fn from(raw: RawDeparture) -> Self {
        let id = departure_id(raw.label, raw.planned_departure_time, &raw.destination);
        Self {
            id,
            planned_departure_time: raw.planned_departure_time,
            realtime_departure_time: raw.realtime_departure_time,
            label: raw.label,
            delay_in_minutes: raw.delay_in_minutes,
            destination: raw.destination,
            occupancy: raw.occupancy,
            messages: raw.messages,
            realtime: raw.realtime,
        }
    }
}

/// Build the deterministic id of a departure.
///
/// `"{label}-{planned}-{destination}"`, lowercased, with every run of
/// whitespace collapsed into a single `-`.
pub fn departure_id(label: Line, planned_departure_time: i64, destination: &str) -> String {
    let raw = format!("{}-{}-{}", label, planned_departure_time, destination).to_lowercase();

    let mut id = String::with_capacity(raw.len());
    let mut in_whitespace = false;
    for c in raw.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                id.push('-');
            }
            in_whitespace = true;
        } else {
            id.push(c);
            in_whitespace = false;
        }
    }
    id
}

/// A validated station update decoded from one feed message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationUpdate {
    /// Station id, e.g. `"de:09162:6"`.
    pub station: String,

    pub friendly_name: String,

    pub coordinates: Coordinates,

    /// May be empty; `null` is read as empty.
    #[serde(deserialize_with = "null_as_empty")]
    pub departures: Vec<RawDeparture>,
}

impl StationUpdate {
    /// Decode and validate a feed message payload.
    pub fn parse(data: &str) -> Result<Self> {
        let update: StationUpdate = serde_json::from_str(data)?;

        if update.station.trim().is_empty() {
            return Err(ObserverError::InvalidPayload(
                "station id is empty".to_string(),
            ));
        }

        if let Some(dep) = update
            .departures
            .iter()
            .find(|d| !d.delay_in_minutes.is_finite())
        {
            return Err(ObserverError::InvalidPayload(format!(
                "departure to {} has a non-finite delay",
                dep.destination
            )));
        }

        Ok(update)
    }
}

/// The live view of one station.
///
/// `avg_delay` is derived from `departures` when the station is built and
/// is never set on its own.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    departures: Vec<Departure>,
    avg_delay: f64,
    friendly_name: String,
    coordinates: Coordinates,
    last_updated: DateTime<Utc>,
}

impl Station {
    pub fn new(
        departures: Vec<Departure>,
        friendly_name: String,
        coordinates: Coordinates,
        last_updated: DateTime<Utc>,
    ) -> Self {
        let avg_delay = crate::live::average_delay(&departures);
        Self {
            departures,
            avg_delay,
            friendly_name,
            coordinates,
            last_updated,
        }
    }

    /// Departures in server order (soonest first).
    pub fn departures(&self) -> &[Departure] {
        &self.departures
    }

    /// Mean delay of this station's departures, `0` when there are none.
    pub fn avg_delay(&self) -> f64 {
        self.avg_delay
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn coordinates(&self) -> &Coordinates {
        &self.coordinates
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// The departure with the greatest delay.
    pub fn most_delayed_departure(&self) -> Option<&Departure> {
        self.departures
            .iter()
            .max_by(|a, b| a.delay_in_minutes.total_cmp(&b.delay_in_minutes))
    }
}

/// Severity tier used to color delays in every view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayTier {
    /// On time or early.
    Good,
    /// Up to five minutes late.
    Warning,
    /// More than five minutes late.
    Critical,
}

impl DelayTier {
    /// Classify a delay in minutes.
    ///
    /// - `good`: delay <= 0
    /// - `warning`: 0 < delay <= 5
    /// - `critical`: delay > 5
    pub fn from_delay(delay: f64) -> Self {
        if delay <= 0.0 {
            DelayTier::Good
        } else if delay <= 5.0 {
            DelayTier::Warning
        } else {
            DelayTier::Critical
        }
    }
}

/// Overall rating of the network shown next to the global delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkRating {
    VeryGood,
    Okay,
    Poor,
}

impl NetworkRating {
    /// `<= 0.5` very good, `<= 2.5` okay, anything above is poor.
    pub fn from_global_delay(delay: f64) -> Self {
        if delay <= 0.5 {
            NetworkRating::VeryGood
        } else if delay <= 2.5 {
            NetworkRating::Okay
        } else {
            NetworkRating::Poor
        }
    }
}

/// Render a delay in minutes as e.g. `"5m 30s"`, `"5m"` or `"30s"`.
pub fn format_delay(minutes: f64) -> String {
    let mut mins = minutes.floor() as i64;
    let mut secs = ((minutes - minutes.floor()) * 60.0).round() as i64;
    if secs == 60 {
        mins += 1;
        secs = 0;
    }

    if mins == 0 {
        format!("{}s", secs)
    } else if secs == 0 {
        format!("{}m", mins)
    } else {
        format!("{}m {}s", mins, secs)
    }
}

// ============================================================================
// Historical data
// ============================================================================

/// One interval aggregate as returned by the history queries.
///
/// All values are string-encoded by the upstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    /// Interval start, `"YYYY-MM-DD HH:mm:ss"` in local time.
    pub bucket: String,

    #[serde(default)]
    pub avg_delay: Option<String>,

    #[serde(default)]
    pub num_departures: Option<String>,

    /// Share of departures above the requested threshold, in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage_threshold: Option<String>,
}

/// A slot of a gap-filled chart series.
///
/// Placeholder slots keep `avg_delay` and `num_departures` as `None` so that
/// "no data" never turns into "zero delay".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartBucket {
    /// Interval start, ms since epoch.
    pub bucket: i64,

    pub avg_delay: Option<String>,

    pub num_departures: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage_threshold: Option<String>,
}

impl ChartBucket {
    /// An empty slot at `bucket`.
    pub fn placeholder(bucket: i64) -> Self {
        Self {
            bucket,
            avg_delay: None,
            num_departures: None,
            percentage_threshold: None,
        }
    }

    /// A slot carrying `source`'s data at `bucket`.
    pub fn from_bucket(source: &Bucket, bucket: i64) -> Self {
        Self {
            bucket,
            avg_delay: source.avg_delay.clone(),
            num_departures: source.num_departures.clone(),
            percentage_threshold: source.percentage_threshold.clone(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.avg_delay.is_none() && self.num_departures.is_none()
    }

    pub fn avg_delay_value(&self) -> Option<f64> {
        parse_decimal(self.avg_delay.as_deref())
    }

    pub fn num_departures_value(&self) -> Option<u64> {
        self.num_departures.as_deref()?.trim().parse().ok()
    }

    /// The charted metric: the threshold percentage or the average delay.
    pub fn value(&self, show_percentage: bool) -> Option<f64> {
        if show_percentage {
            parse_decimal(self.percentage_threshold.as_deref())
        } else {
            self.avg_delay_value()
        }
    }
}

/// One station's buckets for a day, as returned by the history queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationBucketList {
    pub station: String,

    #[serde(default)]
    pub name: String,

    /// Direction flag of the stop.
    #[serde(default)]
    pub stop: i32,

    #[serde(default)]
    pub coordinates: Option<Coordinates>,

    #[serde(default)]
    pub buckets: Vec<Bucket>,
}

/// A station's buckets after gap filling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledStation {
    pub station: String,
    pub name: String,
    pub stop: i32,
    pub coordinates: Option<Coordinates>,
    pub buckets: Vec<ChartBucket>,
}

/// Travel direction along a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::North, Direction::South];

    /// The `south` query flag.
    pub fn south_flag(&self) -> u8 {
        match self {
            Direction::North => 0,
            Direction::South => 1,
        }
    }
}

/// The tab the history view is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartTab {
    #[default]
    Line,
    Map,
    Station,
}

/// Settings driving the history views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSettings {
    pub date: NaiveDate,

    /// Bucket width in minutes.
    pub interval: u32,

    /// Only count live-tracked departures.
    #[serde(default)]
    pub realtime: bool,

    pub line: Line,

    /// Delay threshold in minutes for percentage mode.
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Chart the threshold percentage instead of the average delay.
    #[serde(default)]
    pub show_percentage: bool,

    #[serde(default)]
    pub tab: ChartTab,

    /// Selected time within `date` for the map view.
    #[serde(default)]
    pub time_of_day: Option<NaiveTime>,
}

/// Bucket widths offered by the history controls.
pub const RECOGNIZED_INTERVALS: [u32; 6] = [5, 10, 15, 20, 30, 60];

fn default_threshold() -> u32 {
    2
}

impl ChartSettings {
    pub fn is_recognized_interval(&self) -> bool {
        RECOGNIZED_INTERVALS.contains(&self.interval)
    }
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            date: Local::now().date_naive(),
            interval: 30,
            realtime: false,
            line: Line::U1,
            threshold: default_threshold(),
            show_percentage: false,
            tab: ChartTab::Line,
            time_of_day: None,
        }
    }
}

/// Aggregate statistics of one station over a date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationStats {
    pub avg_delay: f64,
    pub total_departures: u64,
    /// Share of departures delayed by more than two minutes, in percent.
    pub delay_percentage: f64,
    #[serde(default)]
    pub monthly_stats: Vec<MonthlyStats>,
    #[serde(default)]
    pub hourly_stats: Vec<HourlyStats>,
    #[serde(default)]
    pub delay_distribution: Vec<DelayHistogramBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyStats {
    /// `YYYY-MM`.
    pub month: String,
    pub avg_delay: f64,
    pub departures: u64,
    #[serde(default)]
    pub line_stats: BTreeMap<String, LineStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyStats {
    pub hour: u8,
    pub avg_delay: f64,
    pub departures: u64,
    #[serde(default)]
    pub line_stats: BTreeMap<String, LineStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineStats {
    pub avg_delay: f64,
    pub departures: u64,
}

/// One bar of the delay severity histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayHistogramBucket {
    /// Human-readable range, e.g. `"1-2 min"`.
    pub range: String,
    pub count: u64,
}

fn parse_decimal(value: Option<&str>) -> Option<f64> {
    value?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
