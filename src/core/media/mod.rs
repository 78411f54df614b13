//! Media correlation.
//!
//! Scans the camera's date-partitioned upload tree, parses snapshot and clip
//! filenames into camera-local timestamps, converts them to UTC, and matches
//! events to the nearest candidate files. Uploaded filenames use camera-local
//! time while events are stored in UTC, so the local offset can push a file
//! into the previous or next UTC calendar day relative to its partition;
//! candidates are therefore gathered from the reference partition and both
//! neighbors. Read-only: the directory is re-scanned on every call.

use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::{Event, DATE_FMT};

// Snapshot filenames: 001_YYYYMMDDHHmmss_[TYPE][0@0][0].jpg
static SNAPSHOT_RE: OnceLock<Regex> = OnceLock::new();

// Clip filenames: HH.MM.SS-HH.MM.SS[TYPE][0@0][0].dav
static CLIP_RE: OnceLock<Regex> = OnceLock::new();

fn snapshot_re() -> &'static Regex {
    SNAPSHOT_RE.get_or_init(|| Regex::new(r"(?i)^\d+_(\d{14})_\[.*\].*\.jpg$").expect("valid regex"))
}

fn clip_re() -> &'static Regex {
    CLIP_RE.get_or_init(|| {
        Regex::new(r"(?i)^(\d{2})\.(\d{2})\.(\d{2})-(\d{2})\.(\d{2})\.(\d{2})\[.*\].*\.dav$")
            .expect("valid regex")
    })
}

/// A file matched to an event, with the partition it physically lives in
/// (which may differ from the event's own date).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMatch {
    pub file_name: String,
    pub partition: String,
}

/// An event enriched with its best snapshot and clip matches.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedEvent {
    #[serde(flatten)]
    pub event: Event,
    pub snapshot: Option<MediaMatch>,
    pub clip: Option<MediaMatch>,
}

#[derive(Clone, Debug)]
struct SnapshotCandidate {
    file_name: String,
    time: DateTime<Utc>,
    partition: String,
}

#[derive(Clone, Debug)]
struct ClipCandidate {
    file_name: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    partition: String,
}

/// Read-only index over the camera upload tree.
pub struct MediaIndex {
    root: PathBuf,
    tz: Tz,
    threshold: Duration,
}

impl MediaIndex {
    pub fn new(root: PathBuf, tz: Tz, threshold_secs: i64) -> Self {
        Self {
            root,
            tz,
            threshold: Duration::seconds(threshold_secs),
        }
    }

    /// Absolute path of a source file inside a partition.
    pub fn source_path(&self, partition: &str, file_name: &str) -> PathBuf {
        self.root.join(partition).join(file_name)
    }

    /// Matches each event to its best snapshot and clip candidates gathered
    /// from the reference date's partition and its two neighbors.
    pub fn match_events(&self, events: Vec<Event>, date: NaiveDate) -> Vec<MatchedEvent> {
        let mut snapshots = Vec::new();
        let mut clips = Vec::new();
        for day in [date - Duration::days(1), date, date + Duration::days(1)] {
            self.scan_partition(day, &mut snapshots, &mut clips);
        }
        snapshots.sort_by_key(|c| c.time);
        clips.sort_by_key(|c| c.start);

        events
            .into_iter()
            .map(|event| {
                let snapshot = self.best_snapshot(&snapshots, event.timestamp);
                let clip = self.containing_clip(&clips, event.timestamp);
                MatchedEvent {
                    event,
                    snapshot,
                    clip,
                }
            })
            .collect()
    }

    /// Nearest snapshot by absolute time distance within the threshold;
    /// candidates are sorted, so the earliest wins ties.
    fn best_snapshot(
        &self,
        candidates: &[SnapshotCandidate],
        at: DateTime<Utc>,
    ) -> Option<MediaMatch> {
        let mut best: Option<(&SnapshotCandidate, Duration)> = None;
        for candidate in candidates {
            let dist = (candidate.time - at).abs();
            if best.as_ref().is_none_or(|(_, d)| dist < *d) {
                best = Some((candidate, dist));
            }
        }
        best.filter(|(_, dist)| *dist <= self.threshold)
            .map(|(c, _)| MediaMatch {
                file_name: c.file_name.clone(),
                partition: c.partition.clone(),
            })
    }

    /// First clip (ascending start) whose tolerance-widened range contains
    /// the event. Containment is required; there is no nearest fallback.
    fn containing_clip(&self, candidates: &[ClipCandidate], at: DateTime<Utc>) -> Option<MediaMatch> {
        candidates
            .iter()
            .find(|c| c.start - self.threshold <= at && at <= c.end + self.threshold)
            .map(|c| MediaMatch {
                file_name: c.file_name.clone(),
                partition: c.partition.clone(),
            })
    }

    /// Collects candidates from one partition, re-anchoring clip times to
    /// that partition's own local calendar date.
    fn scan_partition(
        &self,
        date: NaiveDate,
        snapshots: &mut Vec<SnapshotCandidate>,
        clips: &mut Vec<ClipCandidate>,
    ) {
        let partition = date.format(DATE_FMT).to_string();
        let dir = self.root.join(&partition);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if let Some(local) = parse_snapshot_local(&file_name) {
                match self.local_to_utc(local) {
                    Some(time) => snapshots.push(SnapshotCandidate {
                        file_name,
                        time,
                        partition: partition.clone(),
                    }),
                    None => debug!("Dropping snapshot with unmappable local time: {}", file_name),
                }
            } else if let Some((start, end)) = parse_clip_local(&file_name, date) {
                match (self.local_to_utc(start), self.local_to_utc(end)) {
                    (Some(start), Some(end)) => clips.push(ClipCandidate {
                        file_name,
                        start,
                        end,
                        partition: partition.clone(),
                    }),
                    _ => debug!("Dropping clip with unmappable local time: {}", file_name),
                }
            }
        }
    }

    /// Camera-local wall time to UTC; ambiguous DST times take the earlier
    /// mapping, nonexistent ones drop the candidate.
    fn local_to_utc(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&local)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Extract the camera-local timestamp from a snapshot filename.
fn parse_snapshot_local(file_name: &str) -> Option<NaiveDateTime> {
    let caps = snapshot_re().captures(file_name)?;
    NaiveDateTime::parse_from_str(&caps[1], "%Y%m%d%H%M%S").ok()
}

/// Extract the camera-local (start, end) from a clip filename anchored to
/// the partition's calendar date. An end before the start crosses midnight.
fn parse_clip_local(file_name: &str, date: NaiveDate) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let caps = clip_re().captures(file_name)?;
    let field = |i: usize| caps[i].parse::<u32>().ok();
    let start_time = NaiveTime::from_hms_opt(field(1)?, field(2)?, field(3)?)?;
    let end_time = NaiveTime::from_hms_opt(field(4)?, field(5)?, field(6)?)?;

    let start = date.and_time(start_time);
    let mut end = date.and_time(end_time);
    if end < start {
        end += Duration::days(1);
    }
    Some((start, end))
}
