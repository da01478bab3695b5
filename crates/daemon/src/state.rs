//! Durable record of committed conversions.
//!
//! The processed set lives at `<state_dir>/processed.json` as a flat JSON
//! array of 64-character lowercase-hex fingerprint strings. That shape is a
//! contract with external tooling (stats, pending-count, reset scripts) and
//! must not change. Every rewrite goes through a temp file in the same
//! directory followed by a rename, so a crash mid-write can never expose a
//! partially written set.

use crate::fingerprint::Fingerprint;
use log::warn;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the durable state file inside the state directory.
pub const STATE_FILE_NAME: &str = "processed.json";

/// Error type for processed-set persistence.
#[derive(Debug, Error)]
pub enum StateError {
    /// IO error reading or writing the state file
    #[error("State file IO error: {0}")]
    Io(#[from] std::io::Error),

    /// State file could not be serialized
    #[error("State serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable set of fingerprints whose conversion has been committed.
///
/// Loaded once at startup; a job's fingerprint is merged in only on its own
/// successful commit. Filtering during a scan cycle works on a [`snapshot`]
/// taken at cycle start, so commits landing mid-cycle simply become visible
/// on the next cycle.
///
/// [`snapshot`]: ProcessedStore::snapshot
#[derive(Debug)]
pub struct ProcessedStore {
    path: PathBuf,
    entries: HashSet<Fingerprint>,
}

impl ProcessedStore {
    /// Open the store backed by `<state_dir>/processed.json`.
    ///
    /// A missing file starts an empty set. Entries that are not 64 lowercase
    /// hex characters are dropped with a warning; a file that is not valid
    /// JSON at all resets the set rather than aborting startup.
    pub fn open(state_dir: &Path) -> Result<Self, StateError> {
        let path = state_dir.join(STATE_FILE_NAME);
        let entries = match fs::read_to_string(&path) {
            Ok(content) => parse_entries(&path, &content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(StateError::Io(e)),
        };
        Ok(Self { path, entries })
    }

    /// Path of the underlying state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains(fingerprint)
    }

    /// Point-in-time copy of the set for filtering one scan cycle.
    pub fn snapshot(&self) -> HashSet<Fingerprint> {
        self.entries.clone()
    }

    /// Record a committed fingerprint and rewrite the state file atomically.
    ///
    /// The entry is only considered durable once this returns `Ok`; callers
    /// must not delete source material before that point.
    pub fn insert_and_persist(&mut self, fingerprint: Fingerprint) -> Result<(), StateError> {
        self.entries.insert(fingerprint);
        self.persist()
    }

    fn persist(&self) -> Result<(), StateError> {
        let mut sorted: Vec<&str> = self.entries.iter().map(Fingerprint::as_str).collect();
        sorted.sort_unstable();
        let json = serde_json::to_string_pretty(&sorted)?;

        // Write-temp, flush, rename: the state file is either the old set or
        // the new one, never anything in between.
        let temp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

fn parse_entries(path: &Path, content: &str) -> HashSet<Fingerprint> {
    let raw: Vec<String> = match serde_json::from_str(content) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(
                "State file {} is not a JSON array of strings ({}); starting with an empty set",
                path.display(),
                e
            );
            return HashSet::new();
        }
    };

    let mut entries = HashSet::with_capacity(raw.len());
    for value in raw {
        match Fingerprint::parse(&value) {
            Some(fp) => {
                entries.insert(fp);
            }
            None => warn!(
                "Dropping malformed fingerprint entry {:?} from {}",
                value,
                path.display()
            ),
        }
    }
    entries
}
