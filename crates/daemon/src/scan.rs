//! Scanner module for discovering conversion candidates.
//!
//! Walks the configured roots through a transfer backend, filtering by
//! include extension and exclude patterns. A root that cannot be listed is
//! logged and skipped; discovery never aborts wholesale on one bad root.

use crate::config::OUTPUT_EXTENSION;
use crate::transfer::{FileMeta, TransferBackend};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// A candidate video file discovered during a scan cycle.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Full path to the source file (local path or remote POSIX path).
    pub path: PathBuf,
    /// File size in bytes at discovery time.
    pub size: u64,
    /// Last modified time of the file.
    pub modified: SystemTime,
    /// Lowercased extension, without the dot.
    pub extension: String,
}

impl Candidate {
    fn from_meta(meta: FileMeta) -> Option<Self> {
        let extension = meta
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())?;
        Some(Self {
            path: meta.path,
            size: meta.size,
            modified: meta.modified,
            extension,
        })
    }

    /// Path the converted output will occupy, next to the source.
    ///
    /// `/videos/film.mp4` -> `/videos/film.m4v`
    pub fn output_path(&self) -> PathBuf {
        self.path.with_extension(OUTPUT_EXTENSION)
    }
}

/// Minimal glob matcher supporting `*` and `?`.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p = pattern.as_bytes();
    let s = name.as_bytes();
    let (mut pi, mut si) = (0usize, 0usize);
    let (mut star, mut match_i): (isize, usize) = (-1, 0);
    while si < s.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi] == s[si]) {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = pi as isize;
            pi += 1;
            match_i = si;
        } else if star != -1 {
            pi = (star + 1) as usize;
            match_i += 1;
            si = match_i;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// First matching pattern excludes; patterns are tried against the file name
/// and against the full path.
pub fn is_excluded(path: &Path, patterns: &[String]) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let full = path.to_string_lossy();
    patterns
        .iter()
        .any(|p| wildcard_match(p, &name) || wildcard_match(p, &full))
}

/// Discovers candidates across the configured roots.
#[derive(Clone)]
pub struct Scanner {
    backend: Arc<dyn TransferBackend>,
    roots: Vec<PathBuf>,
    include_extensions: Vec<String>,
    exclude_patterns: Vec<String>,
}

impl Scanner {
    pub fn new(
        backend: Arc<dyn TransferBackend>,
        roots: Vec<PathBuf>,
        include_extensions: Vec<String>,
        exclude_patterns: Vec<String>,
    ) -> Self {
        Self {
            backend,
            roots,
            include_extensions,
            exclude_patterns,
        }
    }

    /// Run one discovery pass. Finite; rebuilt from scratch every cycle.
    pub fn scan(&self) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        for root in &self.roots {
            let entries = match self.backend.list_root(root) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Skipping root {}: {}", root.display(), e);
                    continue;
                }
            };

            for meta in entries {
                let Some(candidate) = Candidate::from_meta(meta) else {
                    continue;
                };
                if !self
                    .include_extensions
                    .iter()
                    .any(|ext| *ext == candidate.extension)
                {
                    continue;
                }
                if is_excluded(&candidate.path, &self.exclude_patterns) {
                    debug!("Excluded by pattern: {}", candidate.path.display());
                    continue;
                }
                candidates.push(candidate);
            }
        }

        debug!(
            "Discovered {} candidate(s) across {} root(s)",
            candidates.len(),
            self.roots.len()
        );
        candidates
    }
}
