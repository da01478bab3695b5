//! Stability checking for sources that may still be written to.
//!
//! Before transferring a candidate in, the worker re-stats it after a short
//! wait and compares sizes. A growing file is left alone; the next scan
//! cycle picks it up again once it has settled.

use crate::transfer::{TransferBackend, TransferError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Result of a stability check on a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityResult {
    /// File size remained unchanged during the stability window.
    Stable,
    /// File size changed during the stability window.
    Unstable {
        /// Size when first discovered.
        initial_size: u64,
        /// Size after waiting.
        current_size: u64,
    },
}

/// Compare two sizes into a [`StabilityResult`].
#[inline]
pub fn compare_sizes(initial_size: u64, current_size: u64) -> StabilityResult {
    if initial_size == current_size {
        StabilityResult::Stable
    } else {
        StabilityResult::Unstable {
            initial_size,
            current_size,
        }
    }
}

/// Check whether a source is stable by re-statting it after `wait`.
///
/// A zero wait disables the check entirely. Only the calling worker blocks;
/// the stat itself runs on the blocking pool.
pub async fn check_stability(
    backend: &Arc<dyn TransferBackend>,
    path: &Path,
    initial_size: u64,
    wait: Duration,
) -> Result<StabilityResult, TransferError> {
    if wait.is_zero() {
        return Ok(StabilityResult::Stable);
    }

    sleep(wait).await;

    let backend = Arc::clone(backend);
    let path = path.to_path_buf();
    let meta = tokio::task::spawn_blocking(move || backend.stat(&path))
        .await
        .expect("stat task panicked")?;

    Ok(compare_sizes(initial_size, meta.size))
}
