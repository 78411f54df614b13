//! Traffic aggregation.
//!
//! Buckets stored traffic events into fixed 5-minute intervals and computes
//! sliding-window peak statistics over the per-minute count series. Output
//! is a pure function of store contents and query range.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use super::store::EventStore;
use super::sun::CollectionPolicy;
use super::{CoreResult, EventKind, TimeRange, MINUTE_FMT};

/// Bucket width in seconds.
const BUCKET_SECS: i64 = 300;

/// Attribute whose values are sub-counted per bucket.
const DIRECTION_ATTR: &str = "direction";

/// Query range selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsRange {
    /// One UTC calendar day.
    Day,
    /// Seven days ending on (and including) the reference date.
    Week,
}

impl StatsRange {
    /// Resolves the selector against a reference date into a UTC interval.
    pub fn resolve(&self, date: NaiveDate) -> TimeRange {
        let end = (date + Duration::days(1))
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid")
            .and_utc();
        let start = match self {
            StatsRange::Day => end - Duration::days(1),
            StatsRange::Week => end - Duration::days(7),
        };
        TimeRange::new(start, end)
    }
}

/// One fixed-width time bucket of traffic counts.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    /// Bucket start, minute resolution.
    pub time: String,
    pub count: u64,
    /// Per-direction sub-counts; values of the event's direction attribute.
    pub directions: BTreeMap<String, u64>,
}

/// Maximum sum over a sliding window of per-minute counts.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Peak {
    pub count: u64,
    /// Window start, minute resolution; `None` when no events exist in range.
    pub start: Option<String>,
}

/// Collection window bounds for the day view, in UTC.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SunTimes {
    pub sunrise: String,
    pub sunset: String,
}

/// Aggregated traffic statistics for one query range.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub buckets: Vec<Bucket>,
    pub total: u64,
    pub totals_by_direction: BTreeMap<String, u64>,
    pub peak_1min: Peak,
    pub peak_5min: Peak,
    pub peak_1hour: Peak,
    pub no_collection_ranges: Vec<TimeRange>,
    pub sun_times: Option<SunTimes>,
}

/// Read-side aggregator over the event store.
pub struct Aggregator {
    store: Arc<EventStore>,
    policy: Arc<dyn CollectionPolicy>,
}

impl Aggregator {
    pub fn new(store: Arc<EventStore>, policy: Arc<dyn CollectionPolicy>) -> Self {
        Self { store, policy }
    }

    /// Computes the statistics report for a range ending on `date`.
    pub fn stats(&self, range: StatsRange, date: NaiveDate) -> CoreResult<StatsReport> {
        let interval = range.resolve(date);
        let events = self.store.query(EventKind::Traffic, &interval)?;

        // 5-minute buckets, aligned to :00/:05/... of each hour.
        let mut buckets: BTreeMap<DateTime<Utc>, Bucket> = BTreeMap::new();
        let mut totals_by_direction: BTreeMap<String, u64> = BTreeMap::new();
        for event in &events {
            let secs = event.timestamp.timestamp();
            let bucket_start = Utc
                .timestamp_opt(secs - secs.rem_euclid(BUCKET_SECS), 0)
                .single()
                .expect("bucket start is a valid instant");
            let bucket = buckets.entry(bucket_start).or_insert_with(|| Bucket {
                time: bucket_start.format(MINUTE_FMT).to_string(),
                count: 0,
                directions: BTreeMap::new(),
            });
            bucket.count += 1;
            if let Some(direction) = event.attributes.get(DIRECTION_ATTR) {
                *bucket.directions.entry(direction.clone()).or_insert(0) += 1;
                *totals_by_direction.entry(direction.clone()).or_insert(0) += 1;
            }
        }
        let total = events.len() as u64;

        // Per-minute series over the full range; quiet minutes count as 0 so
        // sliding windows spanning them are never shortened or skipped.
        let n_minutes = ((interval.end - interval.start).num_minutes()).max(0) as usize;
        let mut minutes = vec![0u64; n_minutes];
        for event in &events {
            let idx = (event.timestamp - interval.start).num_seconds() / 60;
            minutes[idx as usize] += 1;
        }

        let minute_label = |idx: usize| {
            (interval.start + Duration::minutes(idx as i64))
                .format(MINUTE_FMT)
                .to_string()
        };

        let (peak_1min, peak_5min, peak_1hour) = if events.is_empty() {
            let empty = Peak { count: 0, start: None };
            (empty.clone(), empty.clone(), empty)
        } else {
            let (count_1, idx_1) = sliding_peak(&minutes, 1);
            let (count_5, idx_5) = sliding_peak(&minutes, 5);
            let (count_60, idx_60) = sliding_peak(&minutes, 60);
            (
                Peak { count: count_1, start: Some(minute_label(idx_1)) },
                Peak { count: count_5, start: Some(minute_label(idx_5)) },
                Peak { count: count_60, start: Some(minute_label(idx_60)) },
            )
        };

        let sun_times = match range {
            StatsRange::Day => self.policy.collection_bounds(date).map(|(rise, set)| SunTimes {
                sunrise: rise.format(MINUTE_FMT).to_string(),
                sunset: set.format(MINUTE_FMT).to_string(),
            }),
            StatsRange::Week => None,
        };

        Ok(StatsReport {
            buckets: buckets.into_values().collect(),
            total,
            totals_by_direction,
            peak_1min,
            peak_5min,
            peak_1hour,
            no_collection_ranges: self.policy.no_collection_ranges(interval.start, interval.end),
            sun_times,
        })
    }
}

/// Maximum sum over any contiguous window of `window` minutes, with the
/// earliest start winning ties. One incremental linear pass; when the series
/// is shorter than the window the whole series is the window.
fn sliding_peak(counts: &[u64], window: usize) -> (u64, usize) {
    if counts.is_empty() {
        return (0, 0);
    }
    if counts.len() <= window {
        return (counts.iter().sum(), 0);
    }
    let mut sum: u64 = counts[..window].iter().sum();
    let mut best = sum;
    let mut best_idx = 0;
    for i in 1..=counts.len() - window {
        sum = sum + counts[i + window - 1] - counts[i - 1];
        if sum > best {
            best = sum;
            best_idx = i;
        }
    }
    (best, best_idx)
}
