//! Job executor for the video converter daemon.
//!
//! Runs each claimed candidate end-to-end on one worker: stability gate,
//! transfer-in to staging, conversion, then the ordered commit. A tokio
//! semaphore bounds how many jobs run at once; blocking transfer I/O runs on
//! the blocking pool so only the owning job waits on it.

use crate::claim::ClaimGuard;
use crate::commit::{commit, CommitError};
use crate::config::OUTPUT_EXTENSION;
use crate::convert::{run_ffmpeg, ConversionSettings, ConvertError};
use crate::fingerprint::Fingerprint;
use crate::scan::Candidate;
use crate::stability::{check_stability, StabilityResult};
use crate::state::ProcessedStore;
use crate::transfer::{TransferBackend, TransferError};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// Error type for job execution
#[derive(Debug, Error)]
pub enum JobError {
    /// Transfer in or out failed; retried on a later cycle
    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    /// Encoder failed or timed out; retried on a later cycle
    #[error("Conversion failed: {0}")]
    Convert(#[from] ConvertError),

    /// Commit sequence failed
    #[error("Commit failed: {0}")]
    Commit(#[from] CommitError),

    /// Source was still growing during the stability window
    #[error("Source still being written ({initial_size} -> {current_size} bytes)")]
    UnstableSource { initial_size: u64, current_size: u64 },
}

/// One candidate's full conversion lifecycle.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier (UUID), used in log lines.
    pub id: String,
    /// The discovered source.
    pub candidate: Candidate,
    /// Identity under which completion is recorded.
    pub fingerprint: Fingerprint,
    /// Local staging path for the downloaded source.
    pub staged_input: PathBuf,
    /// Local staging path for the encoder output.
    pub staged_output: PathBuf,
    /// Final destination, next to the source.
    pub destination: PathBuf,
}

impl Job {
    /// Create a job for a claimed candidate, staging inside `work_dir`.
    pub fn new(candidate: Candidate, fingerprint: Fingerprint, work_dir: &Path) -> Self {
        let staged_input = work_dir.join(format!("{}_input.{}", fingerprint, candidate.extension));
        let staged_output = work_dir.join(format!("{}_output.{}", fingerprint, OUTPUT_EXTENSION));
        let destination = candidate.output_path();
        Self {
            id: Uuid::new_v4().to_string(),
            candidate,
            fingerprint,
            staged_input,
            staged_output,
            destination,
        }
    }
}

/// Configuration for the executor pipeline.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum concurrent jobs.
    pub workers: u32,
    /// Staging directory; distinct from every destination directory.
    pub work_dir: PathBuf,
    /// Keep sources after successful conversion.
    pub keep_original: bool,
    /// Stability window before transfer-in (zero disables).
    pub stability_wait: Duration,
}

/// Executes jobs with bounded concurrency.
pub struct JobExecutor {
    semaphore: Arc<Semaphore>,
    backend: Arc<dyn TransferBackend>,
    settings: ConversionSettings,
    processed: Arc<Mutex<ProcessedStore>>,
    config: ExecutorConfig,
}

impl JobExecutor {
    pub fn new(
        backend: Arc<dyn TransferBackend>,
        settings: ConversionSettings,
        processed: Arc<Mutex<ProcessedStore>>,
        config: ExecutorConfig,
    ) -> Self {
        let permits = config.workers as usize;
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            backend,
            settings,
            processed,
            config,
        }
    }

    /// Number of free worker slots.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Try to reserve a worker slot without waiting.
    ///
    /// The scheduler calls this while dispatching; candidates that find no
    /// free slot simply wait for the next cycle.
    pub fn try_acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    /// Run a job end-to-end, holding its worker permit and claim until done.
    ///
    /// Staging files are removed on every exit path; the claim guard drops
    /// when this returns, releasing the fingerprint at the job's terminal
    /// state.
    pub async fn execute(
        &self,
        job: Job,
        permit: OwnedSemaphorePermit,
        claim: ClaimGuard,
    ) -> Result<(), JobError> {
        let _permit = permit;
        let _claim = claim;

        let result = self.run_pipeline(&job).await;
        self.cleanup_staging(&job);
        result
    }

    async fn run_pipeline(&self, job: &Job) -> Result<(), JobError> {
        match check_stability(
            &self.backend,
            &job.candidate.path,
            job.candidate.size,
            self.config.stability_wait,
        )
        .await?
        {
            StabilityResult::Stable => {}
            StabilityResult::Unstable {
                initial_size,
                current_size,
            } => {
                return Err(JobError::UnstableSource {
                    initial_size,
                    current_size,
                })
            }
        }

        info!(
            "[{}] transferring in {} ({} bytes)",
            job.id,
            job.candidate.path.display(),
            job.candidate.size
        );
        {
            let backend = Arc::clone(&self.backend);
            let source = job.candidate.path.clone();
            let staging = job.staged_input.clone();
            tokio::task::spawn_blocking(move || backend.fetch(&source, &staging))
                .await
                .expect("fetch task panicked")?;
        }

        info!("[{}] converting {}", job.id, job.candidate.path.display());
        run_ffmpeg(&job.staged_input, &job.staged_output, &self.settings).await?;

        info!("[{}] committing {}", job.id, job.destination.display());
        {
            let backend = Arc::clone(&self.backend);
            let processed = Arc::clone(&self.processed);
            let staged_output = job.staged_output.clone();
            let destination = job.destination.clone();
            let source = job.candidate.path.clone();
            let modified = job.candidate.modified;
            let fingerprint = job.fingerprint.clone();
            let keep_original = self.config.keep_original;
            tokio::task::spawn_blocking(move || {
                commit(
                    backend.as_ref(),
                    &staged_output,
                    &destination,
                    &source,
                    modified,
                    &processed,
                    fingerprint,
                    keep_original,
                )
            })
            .await
            .expect("commit task panicked")?;
        }

        info!(
            "[{}] committed {} -> {}",
            job.id,
            job.candidate.path.display(),
            job.destination.display()
        );
        Ok(())
    }

    fn cleanup_staging(&self, job: &Job) {
        let _ = std::fs::remove_file(&job.staged_input);
        let _ = std::fs::remove_file(&job.staged_output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::ClaimTable;
    use crate::state::ProcessedStore;
    use crate::transfer::LocalBackend;
    use std::fs;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn candidate(path: &Path) -> Candidate {
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Candidate {
            path: path.to_path_buf(),
            size,
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(1_400_000_000),
            extension: "mp4".to_string(),
        }
    }

    #[cfg(unix)]
    fn fake_encoder(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-ffmpeg");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    struct Fixture {
        _temp: TempDir,
        executor: JobExecutor,
        claims: Arc<ClaimTable>,
        processed: Arc<Mutex<ProcessedStore>>,
        work_dir: PathBuf,
        source: PathBuf,
    }

    #[cfg(unix)]
    fn fixture(encoder_body: &str, workers: u32) -> Fixture {
        let temp = TempDir::new().unwrap();
        let videos = temp.path().join("videos");
        let work_dir = temp.path().join("work");
        let state_dir = temp.path().join("state");
        fs::create_dir_all(&videos).unwrap();
        fs::create_dir_all(&work_dir).unwrap();
        fs::create_dir_all(&state_dir).unwrap();

        let source = videos.join("a.mp4");
        fs::write(&source, b"source-bytes").unwrap();

        let settings = ConversionSettings {
            ffmpeg_path: fake_encoder(temp.path(), encoder_body),
            codec: "libx264".to_string(),
            crf: 23,
            preset: "medium".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            timeout: Duration::from_secs(10),
        };

        let processed = Arc::new(Mutex::new(ProcessedStore::open(&state_dir).unwrap()));
        let executor = JobExecutor::new(
            Arc::new(LocalBackend::new()),
            settings,
            Arc::clone(&processed),
            ExecutorConfig {
                workers,
                work_dir: work_dir.clone(),
                keep_original: true,
                stability_wait: Duration::ZERO,
            },
        );

        Fixture {
            _temp: temp,
            executor,
            claims: ClaimTable::new(),
            processed,
            work_dir,
            source,
        }
    }

    const WRITE_OUTPUT: &str =
        r#"for a in "$@"; do out="$a"; done; printf converted > "$out""#;

    #[test]
    fn test_job_staging_paths_live_in_work_dir() {
        let c = Candidate {
            path: PathBuf::from("/videos/film.mp4"),
            size: 10,
            modified: SystemTime::UNIX_EPOCH,
            extension: "mp4".to_string(),
        };
        let fp = Fingerprint::from_path(&c.path);
        let job = Job::new(c, fp.clone(), Path::new("/work"));

        assert!(job.staged_input.starts_with("/work"));
        assert!(job.staged_output.starts_with("/work"));
        assert_eq!(
            job.staged_input,
            PathBuf::from(format!("/work/{}_input.mp4", fp))
        );
        assert_eq!(
            job.staged_output,
            PathBuf::from(format!("/work/{}_output.m4v", fp))
        );
        assert_eq!(job.destination, PathBuf::from("/videos/film.m4v"));
        assert_eq!(job.id.len(), 36);
    }

    #[tokio::test]
    async fn test_permit_limiting() {
        let temp = TempDir::new().unwrap();
        let state_dir = temp.path().join("state");
        fs::create_dir_all(&state_dir).unwrap();
        let executor = JobExecutor::new(
            Arc::new(LocalBackend::new()),
            ConversionSettings {
                ffmpeg_path: PathBuf::from("ffmpeg"),
                codec: "libx264".to_string(),
                crf: 23,
                preset: "medium".to_string(),
                audio_codec: "aac".to_string(),
                audio_bitrate: "128k".to_string(),
                timeout: Duration::from_secs(10),
            },
            Arc::new(Mutex::new(ProcessedStore::open(&state_dir).unwrap())),
            ExecutorConfig {
                workers: 2,
                work_dir: temp.path().join("work"),
                keep_original: true,
                stability_wait: Duration::ZERO,
            },
        );

        assert_eq!(executor.available_permits(), 2);

        let permit1 = executor.try_acquire_permit();
        assert!(permit1.is_some());
        assert_eq!(executor.available_permits(), 1);

        let permit2 = executor.try_acquire_permit();
        assert!(permit2.is_some());
        assert_eq!(executor.available_permits(), 0);

        assert!(executor.try_acquire_permit().is_none());

        drop(permit1);
        assert_eq!(executor.available_permits(), 1);
        assert!(executor.try_acquire_permit().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_success_commits_and_cleans_staging() {
        let f = fixture(WRITE_OUTPUT, 1);
        let c = candidate(&f.source);
        let fp = Fingerprint::from_path(&c.path);
        let job = Job::new(c, fp.clone(), &f.work_dir);
        let destination = job.destination.clone();

        let permit = f.executor.try_acquire_permit().expect("free permit");
        let claim = Arc::clone(&f.claims).claim(fp.clone()).expect("free claim");
        f.executor.execute(job, permit, claim).await.unwrap();

        assert_eq!(fs::read(&destination).unwrap(), b"converted");
        assert!(f.source.exists());
        assert!(f.processed.lock().unwrap().contains(&fp));
        // Claim released at terminal state, permit returned, staging gone
        assert!(!f.claims.is_claimed(&fp));
        assert_eq!(f.executor.available_permits(), 1);
        assert_eq!(fs::read_dir(&f.work_dir).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_encoder_failure_leaves_candidate_unrecorded() {
        let f = fixture("exit 1", 1);
        let c = candidate(&f.source);
        let fp = Fingerprint::from_path(&c.path);
        let job = Job::new(c, fp.clone(), &f.work_dir);
        let destination = job.destination.clone();

        let permit = f.executor.try_acquire_permit().expect("free permit");
        let claim = Arc::clone(&f.claims).claim(fp.clone()).expect("free claim");
        let result = f.executor.execute(job, permit, claim).await;

        assert!(matches!(result, Err(JobError::Convert(_))));
        assert!(!destination.exists(), "no partial output at the destination");
        assert!(f.source.exists());
        assert!(!f.processed.lock().unwrap().contains(&fp));
        assert!(!f.claims.is_claimed(&fp), "claim released on failure");
        assert_eq!(fs::read_dir(&f.work_dir).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_missing_source_is_transfer_error() {
        let f = fixture(WRITE_OUTPUT, 1);
        let missing = f.source.parent().unwrap().join("gone.mp4");
        let c = Candidate {
            path: missing,
            size: 0,
            modified: SystemTime::UNIX_EPOCH,
            extension: "mp4".to_string(),
        };
        let fp = Fingerprint::from_path(&c.path);
        let job = Job::new(c, fp.clone(), &f.work_dir);

        let permit = f.executor.try_acquire_permit().expect("free permit");
        let claim = Arc::clone(&f.claims).claim(fp.clone()).expect("free claim");
        let result = f.executor.execute(job, permit, claim).await;

        assert!(matches!(result, Err(JobError::Transfer(_))));
        assert!(!f.processed.lock().unwrap().contains(&fp));
    }
}
