use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(2000);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another process is updating {} (lock not acquired within {timeout_ms} ms)", root.display())]
    UpdateInProgress { root: PathBuf, timeout_ms: u128 },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

/// Name of the cross-process lock guarding `install_root`: the lowercase
/// hex SHA-256 of the path.
#[must_use]
pub fn lock_key(install_root: &Path) -> String {
    let digest = Sha256::digest(install_root.to_string_lossy().as_bytes());
    format!("{digest:x}")
}

/// Exclusive hold on one install root. Released when dropped.
#[derive(Debug)]
pub struct UpdateLock {
    file: File,
    key: String,
    install_root: PathBuf,
    lock_path: PathBuf,
}

impl UpdateLock {
    /// Acquire the lock for `install_root`, polling until `timeout` elapses.
    /// The lock file lives in `lock_dir` so that it is independent of the
    /// install root's own lifecycle.
    pub fn acquire(
        lock_dir: &Path,
        install_root: &Path,
        timeout: Duration,
    ) -> Result<Self, LockError> {
        std::fs::create_dir_all(lock_dir)
            .map_err(|error| LockError::io("failed to create lock directory", error))?;

        let key = lock_key(install_root);
        let lock_path = lock_dir.join(format!("{key}.lock"));
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|error| LockError::io("failed to open update lock file", error))?;

        let started = Instant::now();
        loop {
            match fs2::FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(error) if is_contended(&error) => {
                    if started.elapsed() >= timeout {
                        warn!(
                            "Timed out waiting for update lock on {}",
                            install_root.display()
                        );
                        return Err(LockError::UpdateInProgress {
                            root: install_root.to_path_buf(),
                            timeout_ms: timeout.as_millis(),
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL.min(timeout));
                }
                Err(error) => {
                    return Err(LockError::io("failed to acquire update lock", error));
                }
            }
        }

        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)).map(|_| ()))
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .map_err(|error| LockError::io("failed to write update lock metadata", error))?;

        debug!(
            "Acquired update lock {key} for {}",
            install_root.display()
        );

        Ok(Self {
            file,
            key,
            install_root: install_root.to_path_buf(),
            lock_path,
        })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Whether this lock guards `install_root`.
    #[must_use]
    pub fn guards(&self, install_root: &Path) -> bool {
        self.key == lock_key(install_root)
    }

    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        if let Err(error) = fs2::FileExt::unlock(&self.file) {
            warn!("Failed to release update lock {}: {error}", self.key);
        } else {
            debug!("Released update lock {}", self.key);
        }
    }
}

fn is_contended(error: &std::io::Error) -> bool {
    error.kind() == std::io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
