//! TrafficScope
//!
//! Event-analytics and media-correlation engine for a fixed camera: ingests
//! timestamped events, serves time-bucketed traffic statistics with
//! sliding-window peaks, matches loosely-synchronized camera uploads to
//! intrusion events, and serves transcoded video and thumbnails through a
//! concurrency-safe, size-bounded artifact cache.
//!
//! The network listener that produces raw events, the HTTP layer, and the
//! astronomical collection-window calculation are external collaborators;
//! this crate exposes the query surface they sit on.

pub mod core;

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use regex::Regex;
use tracing::warn;

use crate::core::cache::{ArtifactCache, ArtifactKey, DerivationKind};
use crate::core::ffmpeg::{detect_ffmpeg, FFmpegInfo, FFmpegRunner};
use crate::core::media::{MatchedEvent, MediaIndex};
use crate::core::stats::{Aggregator, StatsRange, StatsReport};
use crate::core::store::EventStore;
use crate::core::sun::CollectionPolicy;
use crate::core::{Attributes, CoreConfig, CoreError, CoreResult, EventKind, DATE_FMT};

static DATE_RE: OnceLock<Regex> = OnceLock::new();
static SAFE_FILENAME_RE: OnceLock<Regex> = OnceLock::new();

fn date_re() -> &'static Regex {
    DATE_RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"))
}

fn safe_filename_re() -> &'static Regex {
    SAFE_FILENAME_RE.get_or_init(|| Regex::new(r"^[\w.\-\[\]@]+$").expect("valid regex"))
}

/// The engine: one long-lived instance per process, shared by reference
/// across request handlers and the ingestion listener.
pub struct Engine {
    store: Arc<EventStore>,
    aggregator: Aggregator,
    media: MediaIndex,
    cache: ArtifactCache,
}

impl Engine {
    /// Constructs the engine from configuration and a collection policy.
    ///
    /// FFmpeg detection failure is not fatal: statistics and matching keep
    /// working, artifact derivation fails per-request until the tool exists.
    pub fn new(config: CoreConfig, policy: Arc<dyn CollectionPolicy>) -> CoreResult<Self> {
        let tz = config.camera_timezone()?;
        let store = Arc::new(EventStore::open(
            &config.db_path,
            policy.clone(),
            config.intrusion_debounce_secs,
        )?);
        let aggregator = Aggregator::new(store.clone(), policy);
        let media = MediaIndex::new(
            config.media_root.clone(),
            tz,
            config.match_threshold_secs,
        );

        let ffmpeg_info = match detect_ffmpeg() {
            Ok(info) => info,
            Err(e) => {
                warn!("FFmpeg not available at startup ({}); derivations will fail until it is", e);
                FFmpegInfo::unresolved()
            }
        };
        let runner = FFmpegRunner::new(
            ffmpeg_info,
            Duration::from_secs(config.derivation_timeout_secs),
        );
        let cache = ArtifactCache::new(
            config.media_root.clone(),
            config.cache_root.clone(),
            config.cache_max_bytes,
            (config.thumbnail_width, config.thumbnail_height),
            runner,
        );

        Ok(Self {
            store,
            aggregator,
            media,
            cache,
        })
    }

    /// Ingestion entry point. Returns whether the event was stored; a skip
    /// by the collection window or debounce is a successful `false`.
    pub fn append_event(
        &self,
        kind: EventKind,
        attributes: &Attributes,
        source: &str,
    ) -> CoreResult<bool> {
        self.store.append(kind, attributes, source, Utc::now())
    }

    /// Traffic statistics for a day or week ending on `date`
    /// (today UTC when omitted).
    pub fn stats(&self, range: StatsRange, date: Option<&str>) -> CoreResult<StatsReport> {
        let date = match date {
            Some(s) => parse_date(s)?,
            None => Utc::now().date_naive(),
        };
        self.aggregator.stats(range, date)
    }

    /// Intrusion events on a UTC date, enriched with matched media.
    pub fn intrusions(&self, date: &str) -> CoreResult<Vec<MatchedEvent>> {
        let date = parse_date(date)?;
        let events = self.store.intrusion_events(date)?;
        Ok(self.media.match_events(events, date))
    }

    /// Distinct dates that have intrusion events, most recent first.
    pub fn intrusion_dates(&self) -> CoreResult<Vec<String>> {
        self.store.intrusion_dates()
    }

    /// Path of an original snapshot inside the camera upload tree.
    pub fn snapshot_path(&self, date: &str, file_name: &str) -> CoreResult<PathBuf> {
        validate_partition(date)?;
        validate_filename(file_name)?;
        let path = self.media.source_path(date, file_name);
        if !path.is_file() {
            return Err(CoreError::NotFound(format!("snapshot not found: {}/{}", date, file_name)));
        }
        Ok(path)
    }

    /// Fetches a derived artifact for a source file, deriving it on first
    /// request. Blocks for the duration of the conversion (bounded by the
    /// configured timeout).
    pub async fn fetch_artifact(
        &self,
        date: &str,
        file_name: &str,
        kind: DerivationKind,
    ) -> CoreResult<PathBuf> {
        validate_partition(date)?;
        validate_filename(file_name)?;
        let key = ArtifactKey::new(date, file_name);
        self.cache.fetch_or_derive(&key, kind).await
    }
}

fn parse_date(s: &str) -> CoreResult<NaiveDate> {
    validate_partition(s)?;
    NaiveDate::parse_from_str(s, DATE_FMT)
        .map_err(|_| CoreError::Validation(format!("invalid date: {}", s)))
}

fn validate_partition(date: &str) -> CoreResult<()> {
    if !date_re().is_match(date) {
        return Err(CoreError::Validation(format!("invalid date format: {}", date)));
    }
    Ok(())
}

fn validate_filename(file_name: &str) -> CoreResult<()> {
    if !safe_filename_re().is_match(file_name) {
        return Err(CoreError::Validation(format!("invalid filename: {}", file_name)));
    }
    Ok(())
}

/// Initialise logging from `RUST_LOG`, optionally duplicating to a daily
/// rolling file. Returns the appender guard; drop it to flush on shutdown.
pub fn init_logging(log_dir: Option<&std::path::Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "trafficscope.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sun::Unrestricted;

    fn engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreConfig {
            db_path: dir.path().join("events.db"),
            media_root: dir.path().join("media"),
            cache_root: dir.path().join("cache"),
            ..CoreConfig::default()
        };
        let engine = Engine::new(config, Arc::new(Unrestricted)).unwrap();
        (dir, engine)
    }

    #[test]
    fn test_validation_rejects_bad_inputs() {
        let (_dir, engine) = engine();

        assert!(matches!(
            engine.stats(StatsRange::Day, Some("junk")).unwrap_err(),
            CoreError::Validation(_)
        ));
        assert!(matches!(
            engine.intrusions("2024/06/01").unwrap_err(),
            CoreError::Validation(_)
        ));
        assert!(matches!(
            engine.snapshot_path("2024-06-01", "../../etc/passwd").unwrap_err(),
            CoreError::Validation(_)
        ));
    }

    #[test]
    fn test_snapshot_lookup() {
        let (dir, engine) = engine();
        let partition = dir.path().join("media").join("2024-06-01");
        std::fs::create_dir_all(&partition).unwrap();
        std::fs::write(partition.join("001_20240601120000_[M].jpg"), b"jpeg").unwrap();

        let found = engine
            .snapshot_path("2024-06-01", "001_20240601120000_[M].jpg")
            .unwrap();
        assert!(found.is_file());

        assert!(matches!(
            engine.snapshot_path("2024-06-01", "missing.jpg").unwrap_err(),
            CoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_append_and_stats_flow() {
        let (_dir, engine) = engine();
        let mut attrs = Attributes::new();
        attrs.insert("direction".into(), "LeftToRight".into());

        assert!(engine.append_event(EventKind::Traffic, &attrs, "cam1").unwrap());
        let report = engine.stats(StatsRange::Day, None).unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.totals_by_direction["LeftToRight"], 1);
    }

    #[test]
    fn test_intrusions_empty_day() {
        let (_dir, engine) = engine();
        assert!(engine.intrusions("2024-06-01").unwrap().is_empty());
        assert!(engine.intrusion_dates().unwrap().is_empty());
    }

    #[test]
    fn test_filename_validation_allows_camera_names() {
        assert!(validate_filename("001_20240601120000_[M][0@0][0].jpg").is_ok());
        assert!(validate_filename("13.00.00-13.05.00[M][0@0][0].dav").is_ok());
        assert!(validate_filename("a/b.jpg").is_err());
        assert!(validate_filename("").is_err());
    }
}
