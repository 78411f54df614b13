//! Engine configuration.
//!
//! Serde-backed config with per-field defaults, a normalization pass that
//! corrects bad values instead of failing, and environment-variable
//! overrides matching the deployment container.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{CoreError, CoreResult};

/// Engine configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfig {
    /// Path of the SQLite event database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root of the camera's date-partitioned upload tree (read-only).
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,

    /// Root of the derived-artifact cache tree (the only tree we write to).
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// Byte budget for the derived-artifact cache, per artifact kind.
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: u64,

    /// IANA name of the camera-local timezone used in uploaded filenames.
    #[serde(default = "default_camera_tz")]
    pub camera_tz: String,

    /// Max timestamp distance (seconds) for a file to match an event.
    #[serde(default = "default_match_threshold_secs")]
    pub match_threshold_secs: i64,

    /// Trailing debounce interval for intrusion events, in seconds.
    #[serde(default = "default_intrusion_debounce_secs")]
    pub intrusion_debounce_secs: i64,

    /// Wall-clock bound for one external conversion tool invocation.
    #[serde(default = "default_derivation_timeout_secs")]
    pub derivation_timeout_secs: u64,

    /// Snapshot thumbnail width in pixels.
    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,

    /// Snapshot thumbnail height in pixels.
    #[serde(default = "default_thumbnail_height")]
    pub thumbnail_height: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/data/traffic.db")
}

fn default_media_root() -> PathBuf {
    PathBuf::from("/media/kamera_front")
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("/data/video_cache")
}

fn default_cache_max_bytes() -> u64 {
    20 * 1024 * 1024 * 1024
}

fn default_camera_tz() -> String {
    "UTC".to_string()
}

fn default_match_threshold_secs() -> i64 {
    30
}

fn default_intrusion_debounce_secs() -> i64 {
    10
}

fn default_derivation_timeout_secs() -> u64 {
    120
}

fn default_thumbnail_width() -> u32 {
    320
}

fn default_thumbnail_height() -> u32 {
    180
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            media_root: default_media_root(),
            cache_root: default_cache_root(),
            cache_max_bytes: default_cache_max_bytes(),
            camera_tz: default_camera_tz(),
            match_threshold_secs: default_match_threshold_secs(),
            intrusion_debounce_secs: default_intrusion_debounce_secs(),
            derivation_timeout_secs: default_derivation_timeout_secs(),
            thumbnail_width: default_thumbnail_width(),
            thumbnail_height: default_thumbnail_height(),
        }
    }
}

impl CoreConfig {
    /// Builds a config from defaults plus the deployment environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("DB_PATH") {
            config.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("INTRUSION_MEDIA_PATH") {
            config.media_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("VIDEO_CACHE_DIR") {
            config.cache_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("VIDEO_CACHE_MAX_GB") {
            match v.parse::<f64>() {
                Ok(gb) if gb > 0.0 => {
                    config.cache_max_bytes = (gb * 1024.0 * 1024.0 * 1024.0) as u64;
                }
                _ => warn!("Ignoring invalid VIDEO_CACHE_MAX_GB: {}", v),
            }
        }
        if let Ok(v) = std::env::var("CAMERA_TZ") {
            config.camera_tz = v;
        }

        config.normalize();
        config
    }

    /// Normalizes and clamps settings so a loaded config is always usable.
    pub fn normalize(&mut self) {
        self.cache_max_bytes = self.cache_max_bytes.max(1024 * 1024);
        self.match_threshold_secs = self.match_threshold_secs.clamp(1, 600);
        self.intrusion_debounce_secs = self.intrusion_debounce_secs.clamp(0, 3600);
        self.derivation_timeout_secs = self.derivation_timeout_secs.clamp(5, 3600);
        self.thumbnail_width = self.thumbnail_width.clamp(16, 1920);
        self.thumbnail_height = self.thumbnail_height.clamp(16, 1080);

        if self.camera_tz.parse::<chrono_tz::Tz>().is_err() {
            warn!("Unknown camera timezone {:?}, falling back to UTC", self.camera_tz);
            self.camera_tz = default_camera_tz();
        }
    }

    /// Resolves the configured camera timezone.
    pub fn camera_timezone(&self) -> CoreResult<chrono_tz::Tz> {
        self.camera_tz
            .parse::<chrono_tz::Tz>()
            .map_err(|_| CoreError::Validation(format!("unknown timezone: {}", self.camera_tz)))
    }
}
