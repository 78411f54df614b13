//! Bounded FFmpeg command execution.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::{FFmpegError, FFmpegInfo, FFmpegResult};

/// Executes conversion commands against the detected FFmpeg installation.
///
/// Every invocation is bounded by a wall-clock timeout; the child process is
/// killed when the bound is exceeded.
#[derive(Clone)]
pub struct FFmpegRunner {
    info: Arc<FFmpegInfo>,
    timeout: Duration,
}

impl FFmpegRunner {
    pub fn new(info: FFmpegInfo, timeout: Duration) -> Self {
        Self {
            info: Arc::new(info),
            timeout,
        }
    }

    pub fn info(&self) -> &FFmpegInfo {
        &self.info
    }

    /// Transcodes a camera recording into a browser-friendly MP4.
    ///
    /// Output contract: H.264 baseline 3.1, yuv420p, capped bitrate, AAC
    /// stereo audio, moov atom up front for progressive playback.
    pub async fn transcode(&self, input: &Path, output: &Path, encoder: &str) -> FFmpegResult<()> {
        if !input.is_file() {
            return Err(FFmpegError::InvalidInput(format!(
                "input file does not exist: {}",
                input.display()
            )));
        }

        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c:v".to_string(),
            encoder.to_string(),
            "-profile:v".to_string(),
            "baseline".to_string(),
            "-level".to_string(),
            "3.1".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-b:v".to_string(),
            "1500k".to_string(),
            "-maxrate".to_string(),
            "2000k".to_string(),
            "-bufsize".to_string(),
            "3000k".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "128k".to_string(),
            "-ac".to_string(),
            "2".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.to_string_lossy().to_string(),
        ];
        self.run(args).await
    }

    /// Resizes a snapshot into a padded JPEG thumbnail.
    pub async fn thumbnail(
        &self,
        input: &Path,
        output: &Path,
        size: (u32, u32),
    ) -> FFmpegResult<()> {
        if !input.is_file() {
            return Err(FFmpegError::InvalidInput(format!(
                "input file does not exist: {}",
                input.display()
            )));
        }

        let (width, height) = size;
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            format!(
                "scale={}:{}:force_original_aspect_ratio=decrease,pad={}:{}:(ow-iw)/2:(oh-ih)/2",
                width, height, width, height
            ),
            "-q:v".to_string(),
            "5".to_string(),
            output.to_string_lossy().to_string(),
        ];
        self.run(args).await
    }

    async fn run(&self, args: Vec<String>) -> FFmpegResult<()> {
        let mut cmd = tokio::process::Command::new(&self.info.ffmpeg_path);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(FFmpegError::ProcessError)?,
            Err(_) => {
                warn!("FFmpeg timed out after {:?}", self.timeout);
                return Err(FFmpegError::Timeout);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FFmpegError::ExecutionFailed(stderr.trim().to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_for(path: &str) -> FFmpegRunner {
        FFmpegRunner::new(
            FFmpegInfo {
                ffmpeg_path: path.into(),
                version: String::new(),
                hw_encoder: None,
            },
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_transcode_rejects_missing_input() {
        let runner = runner_for("ffmpeg");
        let err = runner
            .transcode(Path::new("/nonexistent.dav"), Path::new("/tmp/out.mp4"), "libx264")
            .await
            .unwrap_err();
        assert!(matches!(err, FFmpegError::InvalidInput(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_execution_failure() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.dav");
        std::fs::write(&input, b"data").unwrap();

        let runner = runner_for("/bin/false");
        let err = runner
            .transcode(&input, &dir.path().join("out.mp4"), "libx264")
            .await
            .unwrap_err();
        assert!(matches!(err, FFmpegError::ExecutionFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_slow_tool() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.dav");
        std::fs::write(&input, b"data").unwrap();

        // A stand-in tool that ignores its arguments and just blocks.
        let tool = dir.path().join("slow.sh");
        std::fs::write(&tool, "#!/bin/sh\nsleep 10\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let runner = FFmpegRunner::new(
            FFmpegInfo {
                ffmpeg_path: tool,
                version: String::new(),
                hw_encoder: None,
            },
            Duration::from_millis(100),
        );
        let err = runner
            .thumbnail(&input, &dir.path().join("out.jpg"), (320, 180))
            .await
            .unwrap_err();
        assert!(matches!(err, FFmpegError::Timeout));
    }
}
