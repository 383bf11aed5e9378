//! Gap filling of historical delay buckets.
//!
//! The history queries omit intervals without recorded departures. Charts
//! need one slot per interval, so [`reconcile`] expands a sparse bucket list
//! into a dense series over the whole day, inserting placeholders where no
//! data exists.
//!
//! Bucket strings are local wall-clock times (`"YYYY-MM-DD HH:mm:ss"`).
//! The `_in` variants take the time zone explicitly; the plain ones use
//! [`chrono::Local`].

use std::collections::HashMap;

use chrono::{Days, Local, NaiveDate, NaiveDateTime, TimeZone};

use crate::model::{Bucket, ChartBucket, ReconciledStation, StationBucketList};

const MS_PER_MINUTE: i64 = 60_000;

/// Every interval start from `start_ms` up to and including `end_ms`.
///
/// The end is inclusive, so a full day yields `1440 / interval + 1` slots.
/// An interval of zero yields nothing.
pub fn generate_time_buckets(start_ms: i64, end_ms: i64, interval_minutes: u32) -> Vec<i64> {
    if interval_minutes == 0 {
        return Vec::new();
    }
    let step = i64::from(interval_minutes) * MS_PER_MINUTE;

    let mut buckets = Vec::new();
    let mut t = start_ms;
    while t <= end_ms {
        buckets.push(t);
        t += step;
    }
    buckets
}

/// Parse a bucket string as a wall-clock time in `tz`, returning ms since epoch.
///
/// Ambiguous times resolve to the earlier instant; times that do not exist in
/// `tz` yield `None`.
pub fn parse_bucket_time_in<Tz: TimeZone>(tz: &Tz, bucket: &str) -> Option<i64> {
    let normalized = bucket.trim().replacen(' ', "T", 1);
    let naive = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

pub fn parse_bucket_time(bucket: &str) -> Option<i64> {
    parse_bucket_time_in(&Local, bucket)
}

/// Expand `sparse` into one slot per interval between `start_ms` and `end_ms`.
///
/// Slots with a matching bucket carry its data with `bucket` replaced by the
/// numeric timestamp; all other slots are placeholders. Buckets that fail to
/// parse or fall between slots are ignored.
pub fn reconcile_in<Tz: TimeZone>(
    tz: &Tz,
    sparse: &[Bucket],
    start_ms: i64,
    end_ms: i64,
    interval_minutes: u32,
) -> Vec<ChartBucket> {
    let lookup: HashMap<i64, &Bucket> = sparse
        .iter()
        .filter_map(|b| parse_bucket_time_in(tz, &b.bucket).map(|t| (t, b)))
        .collect();

    generate_time_buckets(start_ms, end_ms, interval_minutes)
        .into_iter()
        .map(|t| match lookup.get(&t) {
            Some(bucket) => ChartBucket::from_bucket(bucket, t),
            None => ChartBucket::placeholder(t),
        })
        .collect()
}

pub fn reconcile(
    sparse: &[Bucket],
    start_ms: i64,
    end_ms: i64,
    interval_minutes: u32,
) -> Vec<ChartBucket> {
    reconcile_in(&Local, sparse, start_ms, end_ms, interval_minutes)
}

/// Local midnight of `date` and of the following day, in ms.
pub fn day_bounds_in<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Option<(i64, i64)> {
    let start = tz
        .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
        .earliest()?;
    let next = date.checked_add_days(Days::new(1))?;
    let end = tz
        .from_local_datetime(&next.and_hms_opt(0, 0, 0)?)
        .earliest()?;
    Some((start.timestamp_millis(), end.timestamp_millis()))
}

pub fn day_bounds(date: NaiveDate) -> Option<(i64, i64)> {
    day_bounds_in(&Local, date)
}

/// Reconcile one station's buckets between `start_ms` and `end_ms`.
pub fn reconcile_station_in<Tz: TimeZone>(
    tz: &Tz,
    station: &StationBucketList,
    start_ms: i64,
    end_ms: i64,
    interval_minutes: u32,
) -> ReconciledStation {
    ReconciledStation {
        station: station.station.clone(),
        name: station.name.clone(),
        stop: station.stop,
        coordinates: station.coordinates.clone(),
        buckets: reconcile_in(tz, &station.buckets, start_ms, end_ms, interval_minutes),
    }
}

/// The bucket whose start is exactly `at_ms`.
pub fn bucket_at<'a, Tz: TimeZone>(tz: &Tz, buckets: &'a [Bucket], at_ms: i64) -> Option<&'a Bucket> {
    buckets
        .iter()
        .find(|b| parse_bucket_time_in(tz, &b.bucket) == Some(at_ms))
}
