//! Live station state.
//!
//! [`LiveState`] folds the departure event feed into one [`Station`] per
//! station id and keeps the network-wide average delay next to it. Updates
//! replace a station wholesale; nothing is merged and nothing is evicted.
//! Both averages are recomputed from scratch on every update.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ObserverError, Result};
use crate::model::{Departure, Station, StationUpdate};

/// Station id to current station view.
pub type StationList = HashMap<String, Station>;

/// Live state shared between the feed task (sole writer) and the HTTP handlers.
pub type SharedLiveState = Arc<RwLock<LiveState>>;

/// Arithmetic mean of `delay_in_minutes`, `0` for an empty slice.
pub fn average_delay(departures: &[Departure]) -> f64 {
    if departures.is_empty() {
        return 0.0;
    }

    let total: f64 = departures.iter().map(|d| d.delay_in_minutes).sum();
    total / departures.len() as f64
}

/// Mean delay over the departures of every station in `stations`.
///
/// Every departure weighs the same regardless of which station it belongs to.
pub fn recompute_global_delay(stations: &StationList) -> f64 {
    let (total, count) = stations
        .values()
        .flat_map(|s| s.departures())
        .fold((0.0, 0usize), |(total, count), d| {
            (total + d.delay_in_minutes, count + 1)
        });

    if count == 0 { 0.0 } else { total / count as f64 }
}

/// The reducer's state.
#[derive(Debug, Default)]
pub struct LiveState {
    stations: StationList,
    global_delay: f64,
    updated_station: Option<String>,
    closed: bool,
}

impl LiveState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh state for sharing.
    pub fn shared() -> SharedLiveState {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Replace the entry for `update.station` and recompute the global delay.
    ///
    /// Departures of a previous snapshot that are missing from `update` are
    /// discarded.
    pub fn apply_station_update(
        &mut self,
        update: StationUpdate,
        now: DateTime<Utc>,
    ) -> Result<&Station> {
        if self.closed {
            return Err(ObserverError::FeedClosed);
        }

        let StationUpdate {
            station,
            friendly_name,
            coordinates,
            departures,
        } = update;

        let departures: Vec<Departure> = departures.into_iter().map(Departure::from).collect();
        let entry = Station::new(departures, friendly_name, coordinates, now);

        debug!(
            station = %station,
            departures = entry.departures().len(),
            avg_delay = entry.avg_delay(),
            "Station updated"
        );

        self.stations.insert(station.clone(), entry);
        self.global_delay = recompute_global_delay(&self.stations);
        self.updated_station = Some(station.clone());

        Ok(&self.stations[&station])
    }

    /// Decode one raw feed message and apply it.
    ///
    /// The state is left untouched if the payload fails to decode.
    pub fn apply_payload(&mut self, data: &str, now: DateTime<Utc>) -> Result<&Station> {
        if self.closed {
            return Err(ObserverError::FeedClosed);
        }
        let update = StationUpdate::parse(data)?;
        self.apply_station_update(update, now)
    }

    /// Stop accepting updates. Existing stations are kept.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn stations(&self) -> &StationList {
        &self.stations
    }

    pub fn station(&self, id: &str) -> Option<&Station> {
        self.stations.get(id)
    }

    /// Mean delay across all departures currently held.
    pub fn global_delay(&self) -> f64 {
        self.global_delay
    }

    /// Id of the station touched by the most recent update.
    pub fn updated_station(&self) -> Option<&str> {
        self.updated_station.as_deref()
    }

    /// Stations ordered by display name, then id.
    pub fn sorted_by_name(&self) -> Vec<(&str, &Station)> {
        let mut stations: Vec<_> = self
            .stations
            .iter()
            .map(|(id, s)| (id.as_str(), s))
            .collect();
        stations.sort_by(|a, b| {
            a.1.friendly_name()
                .cmp(b.1.friendly_name())
                .then_with(|| a.0.cmp(b.0))
        });
        stations
    }

    /// The station with the highest average delay.
    pub fn most_delayed_station(&self) -> Option<(&str, &Station)> {
        self.stations
            .iter()
            .max_by(|a, b| {
                a.1.avg_delay()
                    .total_cmp(&b.1.avg_delay())
                    // Deterministic pick among equal averages.
                    .then_with(|| b.0.cmp(a.0))
            })
            .map(|(id, s)| (id.as_str(), s))
    }

    /// Ids of stations that have not been updated within `threshold` of `now`, sorted.
    pub fn stale_stations(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<&str> {
        let mut stale: Vec<&str> = self
            .stations
            .iter()
            .filter(|(_, s)| now - s.last_updated() > threshold)
            .map(|(id, _)| id.as_str())
            .collect();
        stale.sort_unstable();
        stale
    }
}
