//! Startup checks run before the first scan cycle.
//!
//! Failing fast here beats failing on the first job: the encoder binary must
//! respond to `-version`, and the work and state directories must exist.

use crate::config::Config;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

/// Error type for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    /// Encoder binary is missing or not runnable
    #[error("Encoder check failed: {0}")]
    Encoder(String),

    /// Work or state directory could not be created
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Verify the encoder binary runs by invoking `<encoder> -version`.
pub fn check_encoder_available(ffmpeg_path: &Path) -> Result<(), StartupError> {
    let status = Command::new(ffmpeg_path)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(StartupError::Encoder(format!(
            "{} -version exited with {}",
            ffmpeg_path.display(),
            status
        ))),
        Err(e) => Err(StartupError::Encoder(format!(
            "failed to run {}: {}",
            ffmpeg_path.display(),
            e
        ))),
    }
}

/// Run all startup checks for the given configuration.
pub fn run_startup_checks(config: &Config) -> Result<(), StartupError> {
    check_encoder_available(&config.conversion.ffmpeg_path)?;

    for dir in [&config.processing.work_dir, &config.processing.state_dir] {
        fs::create_dir_all(dir).map_err(|e| StartupError::CreateDir {
            path: dir.clone(),
            source: e,
        })?;
    }

    Ok(())
}
