//! Worker-count planning.
//!
//! Conversion jobs are encoder-bound, so the pool stays small: an explicit
//! configured value wins (capped at the hard limit), otherwise the count is
//! derived from the CPU count.

use crate::config::MAX_WORKERS;

/// Derive the concurrent-job limit from configuration.
///
/// - explicit non-zero values are used, capped at [`MAX_WORKERS`]
/// - zero auto-derives: half the logical cores, clamped to [1, 4]
pub fn derive_worker_count(configured: u32) -> u32 {
    if configured > 0 {
        configured.min(MAX_WORKERS)
    } else {
        ((num_cpus::get() as u32) / 2).clamp(1, 4)
    }
}
