//! Historical delay charts.
//!
//! A [`HistorySession`] owns the settings of the history view. Settings
//! changes are debounced; once they settle, both directions of the selected
//! line are fetched in parallel, reconciled into dense series and stored in
//! a [`ChartStore`]. Every fetch is tagged with a generation number so that
//! a slow, superseded response can never replace a newer chart.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{Local, TimeZone};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::{GlobalDelayQuery, LineDelayQuery};
use crate::error::{ObserverError, Result};
use crate::model::{
    ChartSettings, Coordinates, DelayTier, Direction, ReconciledStation, StationBucketList,
};
use crate::reconcile::{bucket_at, day_bounds_in, reconcile_station_in};

/// Default quiet period before a settings change triggers a fetch.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Where historical bucket data comes from.
pub trait DelaySource: Send + Sync + 'static {
    /// One direction of a line for a day.
    fn line_delay(
        &self,
        query: &LineDelayQuery,
    ) -> impl Future<Output = Result<Vec<StationBucketList>>> + Send;

    /// Every station for a day.
    fn global_delay(
        &self,
        query: &GlobalDelayQuery,
    ) -> impl Future<Output = Result<Vec<StationBucketList>>> + Send;
}

/// Both directions of a line, gap-filled over the selected day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineChart {
    pub settings: ChartSettings,
    /// Generation of the fetch that produced this chart.
    pub generation: u64,
    pub north: Vec<ReconciledStation>,
    pub south: Vec<ReconciledStation>,
}

/// Fetch north and south of `settings.line` in parallel and reconcile them.
pub async fn fetch_line_chart<S, Tz>(
    source: &S,
    settings: &ChartSettings,
    tz: &Tz,
) -> Result<(Vec<ReconciledStation>, Vec<ReconciledStation>)>
where
    S: DelaySource,
    Tz: TimeZone,
{
    let (start, end) = day_bounds_in(tz, settings.date)
        .ok_or_else(|| ObserverError::InvalidDate(settings.date.to_string()))?;

    let north_query = LineDelayQuery::from_settings(settings, Direction::North);
    let south_query = LineDelayQuery::from_settings(settings, Direction::South);
    let (north, south) = tokio::join!(
        source.line_delay(&north_query),
        source.line_delay(&south_query)
    );

    let reconcile_all = |stations: Vec<StationBucketList>| -> Vec<ReconciledStation> {
        stations
            .iter()
            .map(|s| reconcile_station_in(tz, s, start, end, settings.interval))
            .collect()
    };

    Ok((reconcile_all(north?), reconcile_all(south?)))
}

#[derive(Debug, Default)]
struct StoreInner {
    issued: u64,
    chart: Option<LineChart>,
}

/// Latest chart plus the generation counter that guards it.
#[derive(Debug, Default)]
pub struct ChartStore {
    inner: Mutex<StoreInner>,
}

impl ChartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next generation. Any result tagged with an older one is stale.
    pub fn issue(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.issued += 1;
        inner.issued
    }

    pub fn latest_issued(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .issued
    }

    /// Store `chart` if its generation is still the latest issued.
    ///
    /// Returns `false` when the chart was discarded.
    pub fn resolve(&self, chart: LineChart) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if chart.generation != inner.issued {
            return false;
        }
        inner.chart = Some(chart);
        true
    }

    pub fn chart(&self) -> Option<LineChart> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .chart
            .clone()
    }
}

/// Debounced history view state.
///
/// Dropping the last handle stops the background task.
#[derive(Clone)]
pub struct HistorySession {
    settings: Arc<watch::Sender<ChartSettings>>,
    store: Arc<ChartStore>,
}

impl HistorySession {
    /// Start a session: fetch `initial` right away, then follow [`update`](Self::update)s.
    ///
    /// Must be called within a tokio runtime.
    pub fn start<S: DelaySource>(source: Arc<S>, initial: ChartSettings, debounce: Duration) -> Self {
        let (tx, rx) = watch::channel(initial.clone());
        let store = Arc::new(ChartStore::new());

        // `drive` only follows changes made after this point.
        spawn_fetch(&source, &store, initial);
        tokio::spawn(drive(source, rx, Arc::clone(&store), debounce));

        Self {
            settings: Arc::new(tx),
            store,
        }
    }

    /// Replace the settings. The fetch happens once changes settle.
    pub fn update(&self, settings: ChartSettings) {
        self.settings.send_replace(settings);
    }

    pub fn settings(&self) -> ChartSettings {
        self.settings.borrow().clone()
    }

    /// The most recent chart, if any fetch has completed.
    pub fn chart(&self) -> Option<LineChart> {
        self.store.chart()
    }

    pub fn store(&self) -> &ChartStore {
        &self.store
    }
}

async fn drive<S: DelaySource>(
    source: Arc<S>,
    mut rx: watch::Receiver<ChartSettings>,
    store: Arc<ChartStore>,
    debounce: Duration,
) {
    while rx.changed().await.is_ok() {
        // Restart the timer on every further change.
        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        debug!("History session closed during debounce");
                        return;
                    }
                }
            }
        }

        let settings = rx.borrow_and_update().clone();
        spawn_fetch(&source, &store, settings);
    }

    debug!("History session closed");
}

fn spawn_fetch<S: DelaySource>(source: &Arc<S>, store: &Arc<ChartStore>, settings: ChartSettings) {
    let generation = store.issue();
    let source = Arc::clone(source);
    let store = Arc::clone(store);

    tokio::spawn(async move {
        info!(
            generation,
            date = %settings.date,
            line = %settings.line,
            interval = settings.interval,
            "Fetching line history"
        );

        match fetch_line_chart(source.as_ref(), &settings, &Local).await {
            Ok((north, south)) => {
                let chart = LineChart {
                    settings,
                    generation,
                    north,
                    south,
                };
                if !store.resolve(chart) {
                    debug!(generation, "Discarded superseded line history");
                }
            }
            Err(e) => {
                warn!(generation, error = %e, "Failed to fetch line history");
            }
        }
    });
}

/// One station on the history map at the selected time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapStation {
    pub station: String,
    pub friendly_name: String,
    pub avg_delay: f64,
    pub tier: DelayTier,
    pub coordinates: Option<Coordinates>,
}

/// Station delays at the interval starting at `at_ms`.
///
/// Stations without a bucket (or without a numeric average) at that time are
/// left out. Names come from `friendly_name`, then the upstream name, then
/// `"Unknown Station"`.
pub fn map_snapshot<Tz, F>(
    tz: &Tz,
    stations: &[StationBucketList],
    at_ms: i64,
    friendly_name: F,
) -> Vec<MapStation>
where
    Tz: TimeZone,
    F: Fn(&str) -> Option<String>,
{
    let mut snapshot: Vec<MapStation> = stations
        .iter()
        .filter_map(|s| {
            let bucket = bucket_at(tz, &s.buckets, at_ms)?;
            let avg_delay: f64 = bucket.avg_delay.as_deref()?.trim().parse().ok()?;

            let name = friendly_name(&s.station)
                .or_else(|| (!s.name.is_empty()).then(|| s.name.clone()))
                .unwrap_or_else(|| "Unknown Station".to_string());

            Some(MapStation {
                station: s.station.clone(),
                friendly_name: name,
                avg_delay,
                tier: DelayTier::from_delay(avg_delay),
                coordinates: s.coordinates.clone(),
            })
        })
        .collect();

    snapshot.sort_by(|a, b| a.station.cmp(&b.station));
    snapshot
}
