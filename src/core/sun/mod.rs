//! Collection-window policy.
//!
//! The engine only records traffic events during a configured collection
//! window (typically daylight hours). The astronomical
//! calculation itself is an external collaborator; this module defines its
//! interface plus two implementations: a permissive default for when no
//! location is configured, and a fixed local-time daily window.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::debug;

use super::{CoreError, CoreResult, TimeRange};

/// Time-of-day policy deciding when events are collected.
///
/// All methods are pure functions of the configured location/timezone and
/// return permissive defaults when unconfigured.
pub trait CollectionPolicy: Send + Sync {
    /// Whether events are collected at the given instant.
    fn is_collection_window(&self, at: DateTime<Utc>) -> bool {
        let _ = at;
        true
    }

    /// UTC intervals within `[since, until)` where collection does not occur,
    /// clipped to the query range.
    fn no_collection_ranges(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<TimeRange> {
        let _ = (since, until);
        Vec::new()
    }

    /// UTC bounds of the collection window on a given local calendar day,
    /// or `None` when no window policy is configured.
    fn collection_bounds(&self, date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let _ = date;
        None
    }
}

/// Collect around the clock; no bands, no window bounds.
pub struct Unrestricted;

impl CollectionPolicy for Unrestricted {}

/// A fixed daily collection window in a local timezone.
pub struct FixedHours {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

impl FixedHours {
    pub fn new(tz: Tz, open: NaiveTime, close: NaiveTime) -> CoreResult<Self> {
        if open >= close {
            return Err(CoreError::Validation(format!(
                "collection window must open before it closes: {} >= {}",
                open, close
            )));
        }
        Ok(Self { tz, open, close })
    }

    fn local_to_utc(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }
}

impl CollectionPolicy for FixedHours {
    fn is_collection_window(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.tz).time();
        self.open <= local && local <= self.close
    }

    fn no_collection_ranges(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<TimeRange> {
        let mut out = Vec::new();
        // Start one local day early so the band that closed the previous
        // evening and runs into `since` is still produced.
        let mut day = since.with_timezone(&self.tz).date_naive() - Duration::days(1);
        let end_day = until.with_timezone(&self.tz).date_naive();

        // One nightly band per local day: close of `day` to open of the next.
        while day <= end_day {
            let next = day + Duration::days(1);
            let (band_start, band_end) =
                match (self.local_to_utc(day, self.close), self.local_to_utc(next, self.open)) {
                    (Some(s), Some(e)) => (s, e),
                    _ => {
                        debug!("Skipping no-collection band for {}: unmappable local time", day);
                        day = next;
                        continue;
                    }
                };
            let start = band_start.max(since);
            let end = band_end.min(until);
            if start < end {
                out.push(TimeRange::new(start, end));
            }
            day = next;
        }
        out
    }

    fn collection_bounds(&self, date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let open = self.local_to_utc(date, self.open)?;
        let close = self.local_to_utc(date, self.close)?;
        Some((open, close))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn berlin_hours() -> FixedHours {
        FixedHours::new(
            chrono_tz::Europe::Berlin,
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_unrestricted_is_permissive() {
        let policy = Unrestricted;
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 2, 0, 0).unwrap();
        assert!(policy.is_collection_window(now));
        assert!(policy.no_collection_ranges(now, now + Duration::days(1)).is_empty());
        assert!(policy.collection_bounds(now.date_naive()).is_none());
    }

    #[test]
    fn test_rejects_inverted_window() {
        let res = FixedHours::new(
            chrono_tz::UTC,
            NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_window_respects_local_offset() {
        // Berlin is UTC+2 in June: 06:00 local = 04:00 UTC.
        let policy = berlin_hours();
        assert!(!policy.is_collection_window(Utc.with_ymd_and_hms(2024, 6, 1, 3, 30, 0).unwrap()));
        assert!(policy.is_collection_window(Utc.with_ymd_and_hms(2024, 6, 1, 4, 30, 0).unwrap()));
        assert!(policy.is_collection_window(Utc.with_ymd_and_hms(2024, 6, 1, 17, 0, 0).unwrap()));
        assert!(!policy.is_collection_window(Utc.with_ymd_and_hms(2024, 6, 1, 18, 30, 0).unwrap()));
    }

    #[test]
    fn test_nightly_bands_clip_to_range() {
        let policy = berlin_hours();
        let since = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();

        let bands = policy.no_collection_ranges(since, until);
        // Band from the previous evening runs into the morning of June 1,
        // and the June 1 evening band is clipped at midnight UTC.
        assert_eq!(bands.len(), 2);
        assert_eq!(bands[0].start, since);
        assert_eq!(bands[0].end, Utc.with_ymd_and_hms(2024, 6, 1, 4, 0, 0).unwrap());
        assert_eq!(bands[1].start, Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap());
        assert_eq!(bands[1].end, until);
    }

    #[test]
    fn test_collection_bounds_in_utc() {
        let policy = berlin_hours();
        let (open, close) = policy
            .collection_bounds(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
            .unwrap();
        assert_eq!(open, Utc.with_ymd_and_hms(2024, 6, 1, 4, 0, 0).unwrap());
        assert_eq!(close, Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap());
    }
}
