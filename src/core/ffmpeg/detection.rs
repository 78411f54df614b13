//! FFmpeg binary discovery and encoder probing.
//!
//! Locates the `ffmpeg` binary (common install locations first, then PATH)
//! and probes once, at process start, for a usable hardware H.264 encoder.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use super::{FFmpegError, FFmpegResult};

/// Software H.264 encoder used when no hardware path exists or it fails.
pub const SOFTWARE_ENCODER: &str = "libx264";

/// Hardware H.264 encoders, in preference order.
const HW_ENCODERS: &[&str] = &["h264_nvenc", "h264_vaapi", "h264_v4l2m2m"];

/// Information about the detected FFmpeg installation.
#[derive(Debug, Clone)]
pub struct FFmpegInfo {
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: PathBuf,
    /// FFmpeg version string.
    pub version: String,
    /// Hardware H.264 encoder available on this machine, if any.
    pub hw_encoder: Option<String>,
}

impl FFmpegInfo {
    /// Fallback that defers binary resolution to the PATH at spawn time.
    ///
    /// Used when detection fails at startup; statistics queries still work,
    /// derivations fail per-request until ffmpeg appears.
    pub fn unresolved() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            version: String::new(),
            hw_encoder: None,
        }
    }
}

/// Detects the system FFmpeg installation and probes available encoders.
pub fn detect_ffmpeg() -> FFmpegResult<FFmpegInfo> {
    let ffmpeg_path = which_ffmpeg()?;
    let version = get_ffmpeg_version(&ffmpeg_path)?;
    let hw_encoder = probe_hw_encoder(&ffmpeg_path);

    match &hw_encoder {
        Some(enc) => info!("FFmpeg {} with hardware encoder {}", version, enc),
        None => info!("FFmpeg {} (software encoding only)", version),
    }

    Ok(FFmpegInfo {
        ffmpeg_path,
        version,
        hw_encoder,
    })
}

/// Find the ffmpeg binary in common locations, then the system PATH.
fn which_ffmpeg() -> FFmpegResult<PathBuf> {
    #[cfg(target_os = "windows")]
    let binary_name = "ffmpeg.exe";

    #[cfg(not(target_os = "windows"))]
    let binary_name = "ffmpeg";

    for dir in get_common_ffmpeg_paths() {
        let candidate = dir.join(binary_name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    #[cfg(target_os = "windows")]
    let lookup = ("where", "ffmpeg");

    #[cfg(not(target_os = "windows"))]
    let lookup = ("which", "ffmpeg");

    let output = Command::new(lookup.0)
        .arg(lookup.1)
        .output()
        .map_err(|_| FFmpegError::NotFound)?;

    if output.status.success() {
        let path_str = String::from_utf8_lossy(&output.stdout);
        if let Some(first_line) = path_str.lines().next() {
            return Ok(PathBuf::from(first_line.trim()));
        }
    }

    Err(FFmpegError::NotFound)
}

/// Common FFmpeg installation paths for the current platform.
fn get_common_ffmpeg_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from(r"C:\ffmpeg\bin"));
        paths.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin"));
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/opt/homebrew/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/snap/bin"));
    }

    paths
}

/// Parse the version from `ffmpeg -version` output.
fn get_ffmpeg_version(ffmpeg_path: &Path) -> FFmpegResult<String> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .map_err(FFmpegError::ProcessError)?;

    if !output.status.success() {
        return Err(FFmpegError::ExecutionFailed(
            "failed to query FFmpeg version".to_string(),
        ));
    }

    let output_str = String::from_utf8_lossy(&output.stdout);
    if let Some(first_line) = output_str.lines().next() {
        if let Some(version_part) = first_line.strip_prefix("ffmpeg version ") {
            if let Some(version) = version_part.split_whitespace().next() {
                return Ok(version.to_string());
            }
        }
        return Ok(first_line.to_string());
    }

    Err(FFmpegError::ExecutionFailed(
        "could not parse FFmpeg version".to_string(),
    ))
}

/// Scan `ffmpeg -encoders` for the first usable hardware H.264 encoder.
fn probe_hw_encoder(ffmpeg_path: &Path) -> Option<String> {
    let output = Command::new(ffmpeg_path)
        .args(["-hide_banner", "-encoders"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let listing = String::from_utf8_lossy(&output.stdout);
    pick_hw_encoder(&listing)
}

fn pick_hw_encoder(listing: &str) -> Option<String> {
    for name in HW_ENCODERS {
        let listed = listing
            .lines()
            .any(|line| line.split_whitespace().any(|word| word == *name));
        if listed {
            return Some((*name).to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_paths_not_empty() {
        assert!(!get_common_ffmpeg_paths().is_empty());
    }

    #[test]
    fn test_pick_hw_encoder_prefers_nvenc() {
        let listing = "\
 V....D libx264              libx264 H.264 / AVC\n\
 V....D h264_vaapi           H.264/AVC (VAAPI)\n\
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder\n";
        assert_eq!(pick_hw_encoder(listing).as_deref(), Some("h264_nvenc"));
    }

    #[test]
    fn test_pick_hw_encoder_none_for_software_only() {
        let listing = " V....D libx264              libx264 H.264 / AVC\n";
        assert_eq!(pick_hw_encoder(listing), None);
    }

    #[test]
    fn test_pick_hw_encoder_requires_word_match() {
        // A description mentioning an encoder name inside a longer word
        // must not count as availability.
        let listing = " V....D other                like-h264_vaapi-ish thing\n";
        assert_eq!(pick_hw_encoder(listing), None);
    }
}
