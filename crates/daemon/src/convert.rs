//! Encoder invocation for the video converter daemon.
//!
//! The encoder is always called with a fully enumerated argument vector
//! built from the validated settings; there is no pass-through field, so an
//! exclude pattern, file name, or config value can never smuggle extra
//! arguments into the encoder process.

use crate::config::ConversionConfig;
use log::{debug, warn};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Error type for conversion operations
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Encoder exited with non-zero status
    #[error("Encoder exited with code {0}")]
    ExitCode(i32),

    /// Encoder process was terminated by signal
    #[error("Encoder process was terminated by signal")]
    Terminated,

    /// Encode exceeded the configured timeout
    #[error("Encode timed out after {0:?}")]
    TimedOut(Duration),

    /// Encoder reported success but produced no output file
    #[error("Encoder produced no output file")]
    MissingOutput,

    /// Encoder reported success but the output file is empty
    #[error("Encoder produced an empty output file")]
    EmptyOutput,

    /// IO error spawning or waiting on the encoder
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Validated encoder settings for one run of the daemon.
#[derive(Debug, Clone)]
pub struct ConversionSettings {
    pub ffmpeg_path: PathBuf,
    pub codec: String,
    pub crf: u32,
    pub preset: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub timeout: Duration,
}

impl ConversionSettings {
    pub fn from_config(conversion: &ConversionConfig) -> Self {
        Self {
            ffmpeg_path: conversion.ffmpeg_path.clone(),
            codec: conversion.codec.clone(),
            crf: conversion.crf,
            preset: conversion.preset.clone(),
            audio_codec: conversion.audio_codec.clone(),
            audio_bitrate: conversion.audio_bitrate.clone(),
            timeout: Duration::from_secs(conversion.timeout_secs),
        }
    }
}

/// Build the full ffmpeg argument vector for one conversion.
///
/// The mapping from settings to flags is fixed:
/// `-i <input> -c:v <codec> -crf <crf> -preset <preset> -c:a <audio_codec>
/// -b:a <audio_bitrate> -y <output>`
pub fn build_ffmpeg_args(
    input: &Path,
    output: &Path,
    settings: &ConversionSettings,
) -> Vec<OsString> {
    vec![
        OsString::from("-i"),
        input.as_os_str().to_owned(),
        OsString::from("-c:v"),
        OsString::from(&settings.codec),
        OsString::from("-crf"),
        OsString::from(settings.crf.to_string()),
        OsString::from("-preset"),
        OsString::from(&settings.preset),
        OsString::from("-c:a"),
        OsString::from(&settings.audio_codec),
        OsString::from("-b:a"),
        OsString::from(&settings.audio_bitrate),
        OsString::from("-y"),
        output.as_os_str().to_owned(),
    ]
}

/// Run the encoder against a staged input, producing a staged output.
///
/// The subprocess is spawned with an explicit argument list (no shell) and
/// killed if dropped, so an abandoned job cannot leave an encoder running.
/// Exit status, output presence, and the timeout are all checked; every
/// failure mode is a retryable [`ConvertError`].
pub async fn run_ffmpeg(
    input: &Path,
    output: &Path,
    settings: &ConversionSettings,
) -> Result<(), ConvertError> {
    let args = build_ffmpeg_args(input, output, settings);
    debug!(
        "Running {} with {} args for {}",
        settings.ffmpeg_path.display(),
        args.len(),
        input.display()
    );

    let child = Command::new(&settings.ffmpeg_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    // Dropping the future on timeout drops the child, which kills it.
    let result = match tokio::time::timeout(settings.timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => return Err(ConvertError::TimedOut(settings.timeout)),
    };

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        warn!(
            "Encoder failed for {}: {}",
            input.display(),
            stderr_tail(&stderr)
        );
        return match result.status.code() {
            Some(code) => Err(ConvertError::ExitCode(code)),
            None => Err(ConvertError::Terminated),
        };
    }

    let metadata = std::fs::metadata(output).map_err(|_| ConvertError::MissingOutput)?;
    if metadata.len() == 0 {
        return Err(ConvertError::EmptyOutput);
    }

    Ok(())
}

/// Last chunk of encoder stderr, enough for a log line without flooding it.
fn stderr_tail(stderr: &str) -> &str {
    const TAIL: usize = 512;
    let trimmed = stderr.trim_end();
    match trimmed.char_indices().nth_back(TAIL.saturating_sub(1)) {
        Some((idx, _)) => &trimmed[idx..],
        None => trimmed,
    }
}
