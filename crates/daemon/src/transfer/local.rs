//! Local filesystem transfer backend.
//!
//! Staging lives in a dedicated work directory that is never one of the
//! scanned roots, so a scan during conversion cannot observe a half-written
//! result. Finalization copies into the destination directory under a temp
//! name and renames, keeping the rename on one filesystem.

use super::{temp_upload_path, FileMeta, TransferBackend, TransferError};
use filetime::FileTime;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Transfer backend for directly mounted filesystems.
#[derive(Debug, Default, Clone)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

fn io_err(path: &Path, source: std::io::Error) -> TransferError {
    TransferError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

impl TransferBackend for LocalBackend {
    fn list_root(&self, root: &Path) -> Result<Vec<FileMeta>, TransferError> {
        // Symlink targets are compared against the canonical root, so a link
        // pointing outside the tree is skipped rather than followed.
        let canonical_root = fs::canonicalize(root).map_err(|e| io_err(root, e))?;

        let mut entries = Vec::new();
        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            // Keep the root itself even if its own name is hidden
            entry.depth() == 0 || !is_hidden(entry.file_name())
        });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            if entry.path_is_symlink() {
                match fs::canonicalize(path) {
                    Ok(target) if target.starts_with(&canonical_root) => {}
                    Ok(target) => {
                        debug!(
                            "Not following symlink {} -> {} (outside {})",
                            path.display(),
                            target.display(),
                            root.display()
                        );
                        continue;
                    }
                    Err(_) => continue, // dangling link
                }
            }

            let metadata = match fs::metadata(path) {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };

            entries.push(FileMeta {
                path: path.to_path_buf(),
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        Ok(entries)
    }

    fn stat(&self, path: &Path) -> Result<FileMeta, TransferError> {
        let metadata = fs::metadata(path).map_err(|e| io_err(path, e))?;
        Ok(FileMeta {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }

    fn exists(&self, path: &Path) -> Result<bool, TransferError> {
        match fs::metadata(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(path, e)),
        }
    }

    fn fetch(&self, source: &Path, staging: &Path) -> Result<(), TransferError> {
        fs::copy(source, staging).map_err(|e| io_err(source, e))?;
        Ok(())
    }

    fn store(&self, staging: &Path, dest: &Path) -> Result<(), TransferError> {
        let temp: PathBuf = temp_upload_path(dest);
        fs::copy(staging, &temp).map_err(|e| io_err(&temp, e))?;
        if let Err(e) = fs::rename(&temp, dest) {
            let _ = fs::remove_file(&temp);
            return Err(io_err(dest, e));
        }
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<(), TransferError> {
        fs::remove_file(path).map_err(|e| io_err(path, e))
    }

    fn set_mtime(&self, path: &Path, modified: SystemTime) -> Result<(), TransferError> {
        filetime::set_file_mtime(path, FileTime::from_system_time(modified))
            .map_err(|e| io_err(path, e))
    }
}
