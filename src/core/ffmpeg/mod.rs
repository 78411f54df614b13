//! FFmpeg integration.
//!
//! The external conversion tool boundary: binary discovery, a one-time
//! hardware-encoder probe at process start, and bounded subprocess execution
//! for transcoding and thumbnailing. The hardware/software codec choice is
//! internal to this module and the cache; it is never exposed upward.

mod detection;
mod runner;

pub use detection::{detect_ffmpeg, FFmpegInfo, SOFTWARE_ENCODER};
pub use runner::FFmpegRunner;

/// FFmpeg-related error types
#[derive(Debug, thiserror::Error)]
pub enum FFmpegError {
    #[error("FFmpeg not found on this system")]
    NotFound,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input file: {0}")]
    InvalidInput(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Timeout: conversion took too long")]
    Timeout,
}

pub type FFmpegResult<T> = Result<T, FFmpegError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert!(FFmpegError::NotFound.to_string().contains("not found"));
        assert!(FFmpegError::ExecutionFailed("exit code 1".into())
            .to_string()
            .contains("exit code 1"));
        assert!(FFmpegError::Timeout.to_string().contains("too long"));
    }
}
