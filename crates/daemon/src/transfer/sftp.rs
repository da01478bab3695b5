//! Remote transfer backend over SFTP.
//!
//! One key-authenticated host per run, SFTP subsystem only: listing, read,
//! write, rename, remove, and setstat. No remote command execution is ever
//! requested, which keeps the surface exposed to a hostile remote end to
//! pure file transfer. Every remote path is containment-checked against the
//! configured roots before any I/O.

use super::{path_within_roots, temp_upload_path, FileMeta, TransferBackend, TransferError};
use crate::config::RemoteConfig;
use log::{debug, info, warn};
use ssh2::{FileStat, RenameFlags, Session, Sftp};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Transferred per read/write call; the transfer deadline is checked between
/// chunks.
const CHUNK_SIZE: usize = 32 * 1024;

/// Connection and policy settings for the remote host.
#[derive(Debug, Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_file: PathBuf,
    pub connect_timeout: Duration,
    pub transfer_timeout: Duration,
    /// Remote roots; all remote paths must stay inside these.
    pub roots: Vec<PathBuf>,
    /// Largest source file the backend will download.
    pub max_transfer_bytes: u64,
}

impl SftpSettings {
    pub fn from_config(remote: &RemoteConfig) -> Self {
        Self {
            host: remote.host.clone(),
            port: remote.port,
            user: remote.user.clone(),
            key_file: remote.key_file.clone(),
            connect_timeout: Duration::from_secs(remote.connect_timeout_secs),
            transfer_timeout: Duration::from_secs(remote.transfer_timeout_secs),
            roots: remote.directories.clone(),
            max_transfer_bytes: remote.max_transfer_bytes,
        }
    }
}

struct SftpConnection {
    // The session must outlive the sftp channel; kept for its Drop.
    _session: Session,
    sftp: Sftp,
}

/// Transfer backend for a single remote SFTP host.
///
/// The underlying libssh2 session is not thread-safe, so all operations are
/// serialized behind one lock, mirroring a single shared channel. Connects
/// lazily and reconnects once when a liveness probe fails.
pub struct SftpBackend {
    settings: SftpSettings,
    conn: Mutex<Option<SftpConnection>>,
}

impl SftpBackend {
    pub fn new(settings: SftpSettings) -> Self {
        Self {
            settings,
            conn: Mutex::new(None),
        }
    }

    /// Establish the connection eagerly; useful at startup to fail fast.
    pub fn connect(&self) -> Result<(), TransferError> {
        self.with_sftp(|_| Ok(()))
    }

    fn with_sftp<T>(
        &self,
        op: impl FnOnce(&Sftp) -> Result<T, TransferError>,
    ) -> Result<T, TransferError> {
        let mut slot = self.conn.lock().expect("sftp connection lock poisoned");

        let alive = slot
            .as_ref()
            .is_some_and(|c| c.sftp.realpath(Path::new(".")).is_ok());
        if !alive {
            if slot.take().is_some() {
                warn!("SFTP connection lost, reconnecting");
            }
            *slot = Some(open_connection(&self.settings)?);
        }

        let conn = slot.as_ref().expect("connection was just established");
        op(&conn.sftp)
    }

    fn check_contained(&self, path: &Path) -> Result<(), TransferError> {
        if path_within_roots(path, &self.settings.roots) {
            Ok(())
        } else {
            Err(TransferError::OutsideRoots(path.to_path_buf()))
        }
    }

    fn walk(
        &self,
        sftp: &Sftp,
        dir: &Path,
        out: &mut Vec<FileMeta>,
    ) -> Result<(), TransferError> {
        let entries = match sftp.readdir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                // One unreadable subdirectory does not fail the listing
                warn!("Cannot list remote directory {}: {}", dir.display(), e);
                return Ok(());
            }
        };

        for (path, stat) in entries {
            let hidden = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true);
            if hidden {
                continue;
            }

            if stat.is_dir() {
                self.walk(sftp, &path, out)?;
            } else if stat.file_type().is_symlink() {
                // Follow only when the target resolves inside the roots
                match sftp.realpath(&path) {
                    Ok(target) if path_within_roots(&target, &self.settings.roots) => {
                        if let Ok(target_stat) = sftp.stat(&path) {
                            if target_stat.is_file() {
                                out.push(file_meta(path, &target_stat));
                            }
                        }
                    }
                    Ok(target) => debug!(
                        "Not following remote symlink {} -> {}",
                        path.display(),
                        target.display()
                    ),
                    Err(_) => {} // dangling link
                }
            } else if stat.is_file() {
                out.push(file_meta(path, &stat));
            }
        }
        Ok(())
    }
}

impl TransferBackend for SftpBackend {
    fn list_root(&self, root: &Path) -> Result<Vec<FileMeta>, TransferError> {
        self.check_contained(root)?;
        self.with_sftp(|sftp| {
            // Surface an unlistable root to the caller; subdirectory errors
            // are only logged inside the walk.
            sftp.readdir(root).map_err(|e| sftp_err(root, e))?;
            let mut out = Vec::new();
            self.walk(sftp, root, &mut out)?;
            Ok(out)
        })
    }

    fn stat(&self, path: &Path) -> Result<FileMeta, TransferError> {
        self.check_contained(path)?;
        self.with_sftp(|sftp| {
            let stat = sftp.stat(path).map_err(|e| sftp_err(path, e))?;
            Ok(file_meta(path.to_path_buf(), &stat))
        })
    }

    fn exists(&self, path: &Path) -> Result<bool, TransferError> {
        self.check_contained(path)?;
        self.with_sftp(|sftp| Ok(sftp.stat(path).is_ok()))
    }

    fn fetch(&self, source: &Path, staging: &Path) -> Result<(), TransferError> {
        self.check_contained(source)?;
        let limit = self.settings.max_transfer_bytes;
        let deadline = Instant::now() + self.settings.transfer_timeout;

        self.with_sftp(|sftp| {
            // Size check before the first byte moves
            let stat = sftp.stat(source).map_err(|e| sftp_err(source, e))?;
            let size = stat.size.unwrap_or(0);
            if size > limit {
                return Err(TransferError::TooLarge {
                    path: source.to_path_buf(),
                    size,
                    limit,
                });
            }

            let mut remote = sftp.open(source).map_err(|e| sftp_err(source, e))?;
            let mut local = std::fs::File::create(staging).map_err(|e| io_err(staging, e))?;

            let mut buf = [0u8; CHUNK_SIZE];
            loop {
                if Instant::now() > deadline {
                    drop(local);
                    let _ = std::fs::remove_file(staging);
                    return Err(TransferError::Timeout(source.to_path_buf()));
                }
                let n = remote.read(&mut buf).map_err(|e| io_err(source, e))?;
                if n == 0 {
                    break;
                }
                local.write_all(&buf[..n]).map_err(|e| io_err(staging, e))?;
            }
            Ok(())
        })
    }

    fn store(&self, staging: &Path, dest: &Path) -> Result<(), TransferError> {
        self.check_contained(dest)?;
        let temp = temp_upload_path(dest);
        let deadline = Instant::now() + self.settings.transfer_timeout;

        self.with_sftp(|sftp| {
            let result = (|| {
                let mut local = std::fs::File::open(staging).map_err(|e| io_err(staging, e))?;
                let mut remote = sftp.create(&temp).map_err(|e| sftp_err(&temp, e))?;

                let mut buf = [0u8; CHUNK_SIZE];
                loop {
                    if Instant::now() > deadline {
                        return Err(TransferError::Timeout(dest.to_path_buf()));
                    }
                    let n = local.read(&mut buf).map_err(|e| io_err(staging, e))?;
                    if n == 0 {
                        break;
                    }
                    remote.write_all(&buf[..n]).map_err(|e| io_err(&temp, e))?;
                }
                drop(remote);

                sftp.rename(
                    &temp,
                    dest,
                    Some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC),
                )
                .map_err(|e| sftp_err(dest, e))
            })();

            if result.is_err() {
                // Never leave a partial upload behind
                let _ = sftp.unlink(&temp);
            }
            result
        })
    }

    fn remove(&self, path: &Path) -> Result<(), TransferError> {
        self.check_contained(path)?;
        self.with_sftp(|sftp| sftp.unlink(path).map_err(|e| sftp_err(path, e)))
    }

    fn set_mtime(&self, path: &Path, modified: SystemTime) -> Result<(), TransferError> {
        self.check_contained(path)?;
        let secs = system_time_secs(modified);
        let stat = FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: None,
            atime: Some(secs),
            mtime: Some(secs),
        };
        self.with_sftp(|sftp| sftp.setstat(path, stat).map_err(|e| sftp_err(path, e)))
    }
}

fn open_connection(settings: &SftpSettings) -> Result<SftpConnection, TransferError> {
    info!(
        "Connecting to {}@{}:{}",
        settings.user, settings.host, settings.port
    );

    let addrs = (settings.host.as_str(), settings.port)
        .to_socket_addrs()
        .map_err(|e| TransferError::Connect(format!("resolving {}: {}", settings.host, e)))?;

    let mut tcp = None;
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, settings.connect_timeout) {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }
    let tcp = tcp.ok_or_else(|| {
        TransferError::Connect(format!(
            "connecting to {}:{}: {}",
            settings.host,
            settings.port,
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string())
        ))
    })?;

    let mut session =
        Session::new().map_err(|e| TransferError::Connect(format!("session init: {}", e)))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| TransferError::Connect(format!("handshake: {}", e)))?;
    session
        .userauth_pubkey_file(&settings.user, None, &settings.key_file, None)
        .map_err(|e| {
            TransferError::Connect(format!(
                "key auth with {}: {}",
                settings.key_file.display(),
                e
            ))
        })?;
    if !session.authenticated() {
        return Err(TransferError::Connect(format!(
            "authentication as {} was not accepted",
            settings.user
        )));
    }

    // Guard individual libssh2 calls against indefinite stalls; the overall
    // transfer deadline is enforced per chunk on top of this.
    session.set_timeout(settings.connect_timeout.as_millis() as u32);

    let sftp = session
        .sftp()
        .map_err(|e| TransferError::Connect(format!("opening sftp subsystem: {}", e)))?;

    info!(
        "Connected to {}@{}:{}",
        settings.user, settings.host, settings.port
    );
    Ok(SftpConnection {
        _session: session,
        sftp,
    })
}

fn file_meta(path: PathBuf, stat: &FileStat) -> FileMeta {
    FileMeta {
        path,
        size: stat.size.unwrap_or(0),
        modified: stat
            .mtime
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap_or(UNIX_EPOCH),
    }
}

fn system_time_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn io_err(path: &Path, source: std::io::Error) -> TransferError {
    TransferError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn sftp_err(path: &Path, source: ssh2::Error) -> TransferError {
    TransferError::Sftp {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SftpSettings {
        SftpSettings {
            host: "nas.local".to_string(),
            port: 22,
            user: "convert".to_string(),
            key_file: PathBuf::from("/home/convert/.ssh/id_ed25519"),
            connect_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(3600),
            roots: vec![PathBuf::from("/export/videos")],
            max_transfer_bytes: 1024,
        }
    }

    // Containment is rejected before any connection is attempted: a backend
    // with no live session still refuses traversal immediately.
    #[test]
    fn test_operations_reject_escaping_paths_before_io() {
        let backend = SftpBackend::new(settings());

        let escape = Path::new("/export/videos/../../etc/passwd");
        assert!(matches!(
            backend.stat(escape),
            Err(TransferError::OutsideRoots(_))
        ));
        assert!(matches!(
            backend.remove(escape),
            Err(TransferError::OutsideRoots(_))
        ));
        assert!(matches!(
            backend.fetch(escape, Path::new("/tmp/staged")),
            Err(TransferError::OutsideRoots(_))
        ));
        assert!(matches!(
            backend.store(Path::new("/tmp/staged"), escape),
            Err(TransferError::OutsideRoots(_))
        ));
        assert!(matches!(
            backend.set_mtime(escape, SystemTime::UNIX_EPOCH),
            Err(TransferError::OutsideRoots(_))
        ));
    }

    #[test]
    fn test_list_root_rejects_unconfigured_root() {
        let backend = SftpBackend::new(settings());
        assert!(matches!(
            backend.list_root(Path::new("/export/music")),
            Err(TransferError::OutsideRoots(_))
        ));
    }

    #[test]
    fn test_settings_from_config() {
        let remote = RemoteConfig {
            host: "nas.local".to_string(),
            port: 2022,
            user: "convert".to_string(),
            key_file: PathBuf::from("/key"),
            connect_timeout_secs: 10,
            transfer_timeout_secs: 120,
            directories: vec![PathBuf::from("/export/videos")],
            max_transfer_bytes: 42,
        };
        let settings = SftpSettings::from_config(&remote);

        assert_eq!(settings.port, 2022);
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.transfer_timeout, Duration::from_secs(120));
        assert_eq!(settings.max_transfer_bytes, 42);
    }

    #[test]
    fn test_system_time_secs_conversion() {
        let t = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        assert_eq!(system_time_secs(t), 1_600_000_000);
        assert_eq!(system_time_secs(UNIX_EPOCH), 0);
    }
}
