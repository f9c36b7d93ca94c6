use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;
use crate::fs::{RetryPolicy, delete_directory, delete_file, write_atomic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelete {
    pub path: PathBuf,
    pub scheduled_at: DateTime<Utc>,
}

/// Outcome of [`remove_or_defer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    Deferred,
}

/// Paths that could not be deleted immediately and are retried on a later
/// run. On Windows the OS is additionally asked to delete them at reboot.
///
/// Only paths inside `scope` are ever scheduled or swept; anything else
/// found in the ledger is left recorded for its owner.
#[derive(Debug, Clone)]
pub struct DeferredDeletes {
    ledger: PathBuf,
    scope: PathBuf,
}

impl DeferredDeletes {
    #[must_use]
    pub fn new(ledger: impl Into<PathBuf>, scope: impl Into<PathBuf>) -> Self {
        Self {
            ledger: ledger.into(),
            scope: scope.into(),
        }
    }

    #[must_use]
    pub fn ledger_path(&self) -> &Path {
        &self.ledger
    }

    #[must_use]
    pub fn scope(&self) -> &Path {
        &self.scope
    }

    fn owns(&self, path: &Path) -> bool {
        path.starts_with(&self.scope)
    }

    /// Load every recorded entry. A missing or unreadable ledger is empty.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingDelete> {
        let Ok(data) = std::fs::read_to_string(&self.ledger) else {
            return Vec::new();
        };
        serde_json::from_str(&data).unwrap_or_else(|error| {
            warn!(
                "Ignoring corrupt pending-delete ledger {}: {error}",
                self.ledger.display()
            );
            Vec::new()
        })
    }

    /// Record `path` for deletion on a later run.
    pub fn schedule(&self, path: &Path) -> Result<(), PlatformError> {
        if !self.owns(path) {
            return Err(PlatformError::OutsideScope {
                path: path.to_path_buf(),
                scope: self.scope.clone(),
            });
        }

        let reboot_scheduled = schedule_at_reboot(path);

        let mut pending = self.pending();
        if !pending.iter().any(|entry| entry.path == path) {
            pending.push(PendingDelete {
                path: path.to_path_buf(),
                scheduled_at: Utc::now(),
            });
        }

        match self.save(&pending) {
            Ok(()) => {
                info!("Scheduled deferred delete of {}", path.display());
                Ok(())
            }
            Err(error) if reboot_scheduled => {
                warn!(
                    "Could not record deferred delete of {} in ledger, relying on reboot: {error}",
                    path.display()
                );
                Ok(())
            }
            Err(source) => Err(PlatformError::DeferredDelete {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Retry every recorded deletion inside the scope and keep only what
    /// still exists. Returns the paths that were removed.
    pub fn sweep(&self, policy: &RetryPolicy) -> Vec<PathBuf> {
        let pending = self.pending();
        if pending.is_empty() {
            return Vec::new();
        }

        let mut removed = Vec::new();
        let mut remaining = Vec::new();
        for entry in pending {
            if !self.owns(&entry.path) {
                warn!(
                    "Leaving deferred path {} outside {} untouched",
                    entry.path.display(),
                    self.scope.display()
                );
                remaining.push(entry);
                continue;
            }

            if !entry.path.exists() {
                removed.push(entry.path);
                continue;
            }

            let result = if entry.path.is_dir() {
                delete_directory(&entry.path, policy)
            } else {
                delete_file(&entry.path, policy)
            };

            match result {
                Ok(()) => {
                    info!("Removed deferred path {}", entry.path.display());
                    removed.push(entry.path);
                }
                Err(error) => {
                    warn!("Deferred path {} still present: {error}", entry.path.display());
                    remaining.push(entry);
                }
            }
        }

        if remaining.is_empty() {
            let _ = std::fs::remove_file(&self.ledger);
        } else if let Err(error) = self.save(&remaining) {
            warn!(
                "Failed to rewrite pending-delete ledger {}: {error}",
                self.ledger.display()
            );
        }

        removed
    }

    fn save(&self, pending: &[PendingDelete]) -> std::io::Result<()> {
        if let Some(parent) = self.ledger.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(pending).map_err(std::io::Error::other)?;
        write_atomic(&self.ledger, &data)
    }
}

/// Delete `path` now if possible, otherwise record it in `deferred`.
pub fn remove_or_defer(
    path: &Path,
    policy: &RetryPolicy,
    deferred: &DeferredDeletes,
) -> Result<Removal, PlatformError> {
    let result = if path.is_dir() {
        delete_directory(path, policy)
    } else {
        delete_file(path, policy)
    };

    match result {
        Ok(()) => Ok(Removal::Removed),
        Err(error) => {
            warn!(
                "Immediate delete of {} failed, deferring: {error}",
                path.display()
            );
            deferred.schedule(path)?;
            Ok(Removal::Deferred)
        }
    }
}

#[cfg(target_os = "windows")]
fn schedule_at_reboot(path: &Path) -> bool {
    use windows_sys::Win32::Storage::FileSystem::{MOVEFILE_DELAY_UNTIL_REBOOT, MoveFileExW};

    fn schedule_one(path: &Path) -> bool {
        let wide = crate::wide(path);
        // SAFETY: `wide` is a NUL-terminated UTF-16 buffer alive for the
        // call; a null destination requests deletion.
        unsafe { MoveFileExW(wide.as_ptr(), std::ptr::null(), MOVEFILE_DELAY_UNTIL_REBOOT) != 0 }
    }

    // Children must be scheduled before their parent directory.
    if path.is_dir()
        && let Ok(entries) = std::fs::read_dir(path)
    {
        for entry in entries.flatten() {
            schedule_at_reboot(&entry.path());
        }
    }

    let scheduled = schedule_one(path);
    if !scheduled {
        warn!(
            "MoveFileEx delay-until-reboot failed for {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        );
    }
    scheduled
}

#[cfg(not(target_os = "windows"))]
fn schedule_at_reboot(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{DeferredDeletes, Removal, remove_or_defer};
    use crate::error::PlatformError;
    use crate::fs::RetryPolicy;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(0, Duration::from_millis(1))
    }

    #[test]
    fn schedule_records_path_once() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let deferred = DeferredDeletes::new(temp.path().join(".pending"), temp.path());
        let target = temp.path().join("app-1.0");
        std::fs::create_dir_all(&target).expect("target dir");

        deferred.schedule(&target).expect("schedule should succeed");
        deferred.schedule(&target).expect("second schedule should succeed");

        let pending = deferred.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].path, target);
    }

    #[test]
    fn sweep_removes_existing_paths_and_clears_ledger() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let deferred = DeferredDeletes::new(temp.path().join(".pending"), temp.path());
        let target = temp.path().join("app-1.0");
        std::fs::create_dir_all(target.join("sub")).expect("target dir");
        std::fs::write(target.join("sub/file"), b"x").expect("file");
        deferred.schedule(&target).expect("schedule should succeed");

        let removed = deferred.sweep(&fast_policy());

        assert_eq!(removed, vec![target.clone()]);
        assert!(!target.exists());
        assert!(!deferred.ledger_path().exists());
    }

    #[test]
    fn sweep_leaves_paths_outside_its_scope() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let ledger = temp.path().join(".pending");
        let mine = temp.path().join("First").join("app-1.0");
        let theirs = temp.path().join("Second").join("app-1.0");
        std::fs::create_dir_all(&mine).expect("own version dir");
        std::fs::create_dir_all(&theirs).expect("foreign version dir");
        DeferredDeletes::new(&ledger, temp.path().join("Second"))
            .schedule(&theirs)
            .expect("owner should schedule its path");
        let deferred = DeferredDeletes::new(&ledger, temp.path().join("First"));
        deferred.schedule(&mine).expect("schedule should succeed");

        let removed = deferred.sweep(&fast_policy());

        assert_eq!(removed, vec![mine.clone()]);
        assert!(!mine.exists());
        assert!(theirs.exists());
        let remaining: Vec<_> = deferred.pending().into_iter().map(|entry| entry.path).collect();
        assert_eq!(remaining, vec![theirs]);
    }

    #[test]
    fn schedule_rejects_paths_outside_its_scope() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let deferred =
            DeferredDeletes::new(temp.path().join(".pending"), temp.path().join("First"));

        let error = deferred
            .schedule(&temp.path().join("Second"))
            .expect_err("foreign path should be rejected");

        assert!(matches!(error, PlatformError::OutsideScope { .. }));
        assert!(!deferred.ledger_path().exists());
    }

    #[test]
    fn corrupt_ledger_is_treated_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let ledger = temp.path().join(".pending");
        std::fs::write(&ledger, "{not json").expect("ledger");

        assert!(DeferredDeletes::new(ledger, temp.path()).pending().is_empty());
    }

    #[test]
    fn remove_or_defer_deletes_immediately_when_possible() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let deferred = DeferredDeletes::new(temp.path().join(".pending"), temp.path());
        let target = temp.path().join("old");
        std::fs::create_dir_all(&target).expect("target dir");

        let outcome =
            remove_or_defer(&target, &fast_policy(), &deferred).expect("removal should work");

        assert_eq!(outcome, Removal::Removed);
        assert!(deferred.pending().is_empty());
    }
}
