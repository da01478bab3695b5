//! Daemon coordinator: scan cycles, filtering, dispatch, and shutdown.
//!
//! One lightweight coordinator drives periodic scan cycles. The discovery,
//! filter, and dispatch phase of a cycle runs inline here, so two cycles
//! never overlap in their scheduling phase; only job execution overlaps
//! cycles, bounded by the claim table and the worker semaphore.

use crate::claim::ClaimTable;
use crate::concurrency::derive_worker_count;
use crate::config::{Config, MIN_SCAN_INTERVAL_SECS};
use crate::convert::ConversionSettings;
use crate::executor::{ExecutorConfig, Job, JobError, JobExecutor};
use crate::fingerprint::Fingerprint;
use crate::scan::Scanner;
use crate::startup::{run_startup_checks, StartupError};
use crate::state::{ProcessedStore, StateError};
use crate::transfer::{LocalBackend, SftpBackend, SftpSettings, TransferBackend, TransferError};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Error type for daemon construction
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Durable state could not be opened
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Remote host could not be reached at startup
    #[error("Remote connection failed: {0}")]
    Connect(#[from] TransferError),
}

/// Counters for one scan cycle, logged at cycle end.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleStats {
    /// Candidates produced by discovery.
    pub discovered: usize,
    /// Jobs claimed and handed to workers.
    pub dispatched: usize,
    /// Dry-run only: candidates that would have been dispatched.
    pub pending: usize,
    /// Skipped: fingerprint already in the processed snapshot.
    pub skipped_processed: usize,
    /// Skipped: converted output already sits next to the source.
    pub skipped_existing_output: usize,
    /// Skipped: a job for this fingerprint is already in flight.
    pub skipped_claimed: usize,
    /// Skipped: source exceeds the remote transfer size limit.
    pub skipped_oversize: usize,
    /// Left for a later cycle: no free worker slot.
    pub deferred: usize,
}

/// Handle used to request a graceful shutdown from outside the run loop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Stop dispatching immediately; in-flight jobs get the grace period.
    pub fn signal(&self) {
        let _ = self.tx.send(true);
    }
}

/// Daemon state: configuration, backend, executor, and bookkeeping.
pub struct Daemon {
    config: Config,
    scanner: Scanner,
    backend: Arc<dyn TransferBackend>,
    executor: Arc<JobExecutor>,
    claims: Arc<ClaimTable>,
    processed: Arc<Mutex<ProcessedStore>>,
    /// Per-fingerprint consecutive failure counts, for log attribution only.
    fail_counts: HashMap<Fingerprint, u32>,
    jobs: JoinSet<(Fingerprint, Result<(), JobError>)>,
    shutdown_rx: watch::Receiver<bool>,
    dry_run: bool,
    /// Remote mode only: candidates above this size are skipped up front.
    max_transfer_bytes: Option<u64>,
}

impl Daemon {
    /// Build the daemon from a validated configuration.
    ///
    /// Runs the startup checks, opens the durable state, and, in remote
    /// mode, connects eagerly so authentication problems surface before the
    /// first cycle.
    pub fn new(config: Config, dry_run: bool) -> Result<(Self, ShutdownHandle), DaemonError> {
        run_startup_checks(&config)?;

        let processed = Arc::new(Mutex::new(ProcessedStore::open(
            &config.processing.state_dir,
        )?));

        let (backend, roots, max_transfer_bytes): (Arc<dyn TransferBackend>, Vec<PathBuf>, _) =
            match &config.remote {
                Some(remote) => {
                    let backend = SftpBackend::new(SftpSettings::from_config(remote));
                    backend.connect()?;
                    (
                        Arc::new(backend),
                        remote.directories.clone(),
                        Some(remote.max_transfer_bytes),
                    )
                }
                None => {
                    let local = config
                        .local
                        .as_ref()
                        .expect("validated config has a source mode");
                    (
                        Arc::new(LocalBackend::new()),
                        local.directories.clone(),
                        None,
                    )
                }
            };

        let scanner = Scanner::new(
            Arc::clone(&backend),
            roots,
            config.processing.include_extensions.clone(),
            config.processing.exclude_patterns.clone(),
        );

        let workers = derive_worker_count(config.daemon.max_workers);
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&backend),
            ConversionSettings::from_config(&config.conversion),
            Arc::clone(&processed),
            ExecutorConfig {
                workers,
                work_dir: config.processing.work_dir.clone(),
                keep_original: config.processing.keep_original,
                stability_wait: Duration::from_secs(config.processing.stability_wait_secs),
            },
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let daemon = Self {
            config,
            scanner,
            backend,
            executor,
            claims: ClaimTable::new(),
            processed,
            fail_counts: HashMap::new(),
            jobs: JoinSet::new(),
            shutdown_rx,
            dry_run,
            max_transfer_bytes,
        };
        Ok((daemon, ShutdownHandle { tx: shutdown_tx }))
    }

    fn scan_interval(&self) -> Duration {
        Duration::from_secs(
            self.config
                .daemon
                .scan_interval_secs
                .max(MIN_SCAN_INTERVAL_SECS),
        )
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Run the daemon main loop until a shutdown signal arrives.
    pub async fn run(mut self) {
        let interval = self.scan_interval();
        info!(
            "Video converter daemon started: {} worker(s), scan interval {:?}{}",
            self.executor.available_permits(),
            interval,
            if self.dry_run { ", dry-run" } else { "" }
        );
        match &self.config.remote {
            Some(remote) => info!(
                "Watching {} remote root(s) on {}@{}:{}",
                remote.directories.len(),
                remote.user,
                remote.host,
                remote.port
            ),
            None => {
                if let Some(local) = &self.config.local {
                    info!("Watching {} local root(s)", local.directories.len());
                }
            }
        }

        loop {
            let stats = self.run_cycle().await;
            info!(
                "Scan cycle complete: {} discovered, {} dispatched, {} pending, \
                 {} already processed, {} outputs present, {} in flight, \
                 {} oversize, {} deferred",
                stats.discovered,
                stats.dispatched,
                stats.pending,
                stats.skipped_processed,
                stats.skipped_existing_output,
                stats.skipped_claimed,
                stats.skipped_oversize,
                stats.deferred
            );

            if self.is_shutting_down() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown_rx.changed() => {
                    if self.is_shutting_down() {
                        break;
                    }
                }
            }
        }

        self.drain().await;
        info!("Video converter daemon stopped");
    }

    /// Run one scan cycle: reap finished jobs, snapshot the processed set,
    /// discover, filter, and dispatch while worker slots are free.
    pub async fn run_cycle(&mut self) -> CycleStats {
        self.reap_finished();

        let mut stats = CycleStats::default();

        let snapshot = self
            .processed
            .lock()
            .expect("processed store lock poisoned")
            .snapshot();

        let scanner = self.scanner.clone();
        let candidates = tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .expect("scan task panicked");
        stats.discovered = candidates.len();

        for candidate in candidates {
            if self.is_shutting_down() {
                debug!("Shutdown requested; dispatch stopped");
                break;
            }

            let fingerprint = Fingerprint::from_path(&candidate.path);

            if snapshot.contains(&fingerprint) {
                stats.skipped_processed += 1;
                continue;
            }

            if self.claims.is_claimed(&fingerprint) {
                stats.skipped_claimed += 1;
                continue;
            }

            // A converted sibling suppresses dispatch regardless of what the
            // processed set says.
            match self.output_exists(&candidate).await {
                Ok(true) => {
                    debug!(
                        "Output already present for {}, skipping",
                        candidate.path.display()
                    );
                    stats.skipped_existing_output += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        "Could not check output for {}: {}",
                        candidate.path.display(),
                        e
                    );
                    continue;
                }
            }

            if let Some(limit) = self.max_transfer_bytes {
                if candidate.size > limit {
                    warn!(
                        "Skipping {}: {} bytes exceeds the {} byte transfer limit",
                        candidate.path.display(),
                        candidate.size,
                        limit
                    );
                    stats.skipped_oversize += 1;
                    continue;
                }
            }

            if self.dry_run {
                info!("[dry-run] would convert {}", candidate.path.display());
                stats.pending += 1;
                continue;
            }

            let Some(permit) = self.executor.try_acquire_permit() else {
                debug!(
                    "No free worker for {}, deferring to next cycle",
                    candidate.path.display()
                );
                stats.deferred += 1;
                continue;
            };

            let Some(claim) = Arc::clone(&self.claims).claim(fingerprint.clone()) else {
                stats.skipped_claimed += 1;
                continue;
            };

            let job = Job::new(candidate, fingerprint.clone(), &self.config.processing.work_dir);
            info!(
                "Claimed {} as job {}",
                job.candidate.path.display(),
                job.id
            );

            let executor = Arc::clone(&self.executor);
            self.jobs.spawn(async move {
                let fingerprint = job.fingerprint.clone();
                let result = executor.execute(job, permit, claim).await;
                (fingerprint, result)
            });
            stats.dispatched += 1;
        }

        stats
    }

    async fn output_exists(&self, candidate: &crate::scan::Candidate) -> Result<bool, TransferError> {
        let backend = Arc::clone(&self.backend);
        let output = candidate.output_path();
        tokio::task::spawn_blocking(move || backend.exists(&output))
            .await
            .expect("exists task panicked")
    }

    /// Collect results of jobs that have already finished, without waiting.
    fn reap_finished(&mut self) {
        while let Some(joined) = self.jobs.try_join_next() {
            self.record_outcome(joined);
        }
    }

    /// Wait for every in-flight job to finish.
    async fn join_all_jobs(&mut self) {
        while let Some(joined) = self.jobs.join_next().await {
            self.record_outcome(joined);
        }
    }

    fn record_outcome(
        &mut self,
        joined: Result<(Fingerprint, Result<(), JobError>), tokio::task::JoinError>,
    ) {
        match joined {
            Ok((fingerprint, Ok(()))) => {
                self.fail_counts.remove(&fingerprint);
            }
            Ok((fingerprint, Err(e))) => {
                let count = self.fail_counts.entry(fingerprint.clone()).or_insert(0);
                *count += 1;
                if *count > 1 {
                    // Persistent failures stand out from transient ones
                    warn!("Job for {} failed (attempt {}): {}", fingerprint, count, e);
                } else {
                    warn!("Job for {} failed: {}", fingerprint, e);
                }
            }
            Err(join_err) => warn!("Job task did not complete: {}", join_err),
        }
    }

    /// Graceful shutdown: wait out the grace period, then abandon the rest.
    ///
    /// Abandoned jobs are aborted before their commit ever runs, so their
    /// fingerprints are never recorded as processed; they are simply picked
    /// up again on the next start.
    async fn drain(&mut self) {
        if self.jobs.is_empty() {
            return;
        }
        let grace = Duration::from_secs(self.config.daemon.shutdown_grace_secs);
        info!(
            "Waiting up to {:?} for {} in-flight job(s)",
            grace,
            self.jobs.len()
        );

        if tokio::time::timeout(grace, self.join_all_jobs()).await.is_err() {
            warn!(
                "Grace period elapsed, abandoning {} unfinished job(s)",
                self.jobs.len()
            );
            self.jobs.abort_all();
            while self.jobs.join_next().await.is_some() {}
        }
    }
}
