//! Completion committer: finalize, record, then optionally discard.
//!
//! The order is fixed and load-bearing. The output becomes visible at its
//! destination first (atomic store), the fingerprint is persisted second,
//! and the source is deleted last and only when configured. A crash at any
//! point therefore costs at most one extra reprocessing attempt later; it
//! can never lose a converted result or the original source.

use crate::fingerprint::Fingerprint;
use crate::state::{ProcessedStore, StateError};
use crate::transfer::{TransferBackend, TransferError};
use log::warn;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use thiserror::Error;

/// Error type for commit operations
#[derive(Debug, Error)]
pub enum CommitError {
    /// Finalizing the output at its destination failed
    #[error("Failed to finalize output at {path}: {source}")]
    Finalize {
        path: PathBuf,
        #[source]
        source: TransferError,
    },

    /// Persisting the fingerprint failed; the source has not been touched
    #[error("Failed to persist processed state: {0}")]
    Persist(#[from] StateError),

    /// Deleting the source failed; output and state are already durable
    #[error("Failed to delete source {path}: {source}")]
    DeleteSource {
        path: PathBuf,
        #[source]
        source: TransferError,
    },
}

/// Commit a successfully converted job.
///
/// Sequence: store the staged output at `destination` (atomic temp-then-
/// rename inside the backend), carry the source's mtime onto the finalized
/// output, persist `fingerprint` into the processed store, and finally
/// delete `source` unless `keep_original` is set.
#[allow(clippy::too_many_arguments)]
pub fn commit(
    backend: &dyn TransferBackend,
    staged_output: &Path,
    destination: &Path,
    source: &Path,
    source_modified: SystemTime,
    processed: &Mutex<ProcessedStore>,
    fingerprint: Fingerprint,
    keep_original: bool,
) -> Result<(), CommitError> {
    backend
        .store(staged_output, destination)
        .map_err(|e| CommitError::Finalize {
            path: destination.to_path_buf(),
            source: e,
        })?;

    // Downstream tools sort by mtime; a failure here is cosmetic and must
    // not trigger a reconvert of an output that is already visible.
    if let Err(e) = backend.set_mtime(destination, source_modified) {
        warn!(
            "Could not preserve mtime on {}: {}",
            destination.display(),
            e
        );
    }

    processed
        .lock()
        .expect("processed store lock poisoned")
        .insert_and_persist(fingerprint)?;

    if !keep_original {
        backend
            .remove(source)
            .map_err(|e| CommitError::DeleteSource {
                path: source.to_path_buf(),
                source: e,
            })?;
    }

    Ok(())
}
