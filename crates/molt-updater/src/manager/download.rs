use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::StreamExt;
use log::{debug, info, warn};
use molt_platform::UpdateLock;
use molt_release::{ReleaseEntry, digests_match, sha1_file};

use super::{UpdateManager, blocking};
use crate::error::UpdateError;
use crate::progress::ProgressReporter;
use crate::source::SourceLocation;
use crate::state::UpdaterState;

impl UpdateManager {
    /// Bring every entry's artifact into `packages/`, then verify each
    /// against its size and SHA-1. A mismatching file is deleted and fails
    /// the whole batch. Artifacts already present and intact are not
    /// transferred again. Progress follows the bytes received across all
    /// concurrent transfers, up to 95 before verification.
    ///
    /// # Errors
    /// Returns the first transfer error, or [`UpdateError::ChecksumFailed`]
    /// for the first artifact that does not verify.
    pub async fn download_releases(
        &self,
        lock: &UpdateLock,
        entries: &[ReleaseEntry],
        progress: &ProgressReporter,
    ) -> Result<(), UpdateError> {
        self.ensure_lock(lock)?;
        self.run_phase(
            UpdaterState::Downloading,
            self.download_locked(entries, progress),
        )
        .await
    }

    async fn download_locked(
        &self,
        entries: &[ReleaseEntry],
        progress: &ProgressReporter,
    ) -> Result<(), UpdateError> {
        progress.report(0);
        let packages_dir = self.paths.packages_dir();
        tokio::fs::create_dir_all(&packages_dir).await.map_err(|error| {
            UpdateError::io_with_path("failed to create package directory", &packages_dir, &error)
        })?;

        let total_bytes: u64 = entries.iter().map(ReleaseEntry::filesize).sum();
        let received: Vec<AtomicU64> = entries.iter().map(|_| AtomicU64::new(0)).collect();
        let report_received = || progress.report(received_percent(&received, total_bytes));

        let mut transfers = futures_util::stream::iter(entries.iter().zip(&received))
            .map(|(entry, slot)| {
                let report_received = &report_received;
                async move {
                    self.check_cancelled()?;
                    let on_bytes = |bytes: u64| {
                        slot.store(bytes.min(entry.filesize()), Ordering::Relaxed);
                        report_received();
                    };
                    self.transfer(entry, &on_bytes).await?;
                    slot.store(entry.filesize(), Ordering::Relaxed);
                    report_received();
                    Ok::<(), UpdateError>(())
                }
            })
            .buffer_unordered(self.options.settings.concurrency());

        while let Some(result) = transfers.next().await {
            result?;
        }
        drop(transfers);

        let targets: Vec<(ReleaseEntry, PathBuf)> = entries
            .iter()
            .map(|entry| (entry.clone(), self.package_path(entry)))
            .collect();
        blocking("package verification failed", move || {
            for (entry, path) in &targets {
                verify_or_delete(entry, path)?;
            }
            Ok(())
        })
        .await?;

        info!("Downloaded and verified {} release(s)", entries.len());
        progress.report(100);
        Ok(())
    }

    async fn transfer(
        &self,
        entry: &ReleaseEntry,
        on_bytes: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<(), UpdateError> {
        let dest = self.package_path(entry);
        if self.is_intact(entry, &dest).await {
            debug!("{} is already present, skipping download", entry.filename());
            return Ok(());
        }

        match self.source.artifact(entry.filename()) {
            SourceLocation::Url(url) => {
                info!("Downloading {url}");
                self.options
                    .downloader
                    .fetch_to_file(&url, &dest, on_bytes)
                    .await?;
            }
            SourceLocation::Path(src) => {
                info!("Copying {} to {}", src.display(), dest.display());
                tokio::fs::copy(&src, &dest).await.map_err(|error| {
                    UpdateError::io_with_path("failed to copy release package", &src, &error)
                })?;
            }
        }
        Ok(())
    }

    async fn is_intact(&self, entry: &ReleaseEntry, path: &Path) -> bool {
        if tokio::fs::metadata(path)
            .await
            .map(|metadata| metadata.len() != entry.filesize())
            .unwrap_or(true)
        {
            return false;
        }

        let path = path.to_path_buf();
        let expected = entry.sha1().to_string();
        tokio::task::spawn_blocking(move || {
            sha1_file(&path).is_ok_and(|(actual, _)| digests_match(&expected, &actual))
        })
        .await
        .unwrap_or(false)
    }
}

fn received_percent(received: &[AtomicU64], total_bytes: u64) -> u8 {
    if total_bytes == 0 {
        return 95;
    }
    let sum: u64 = received.iter().map(|slot| slot.load(Ordering::Relaxed)).sum();
    let percent = u128::from(sum.min(total_bytes)) * 95 / u128::from(total_bytes);
    u8::try_from(percent).unwrap_or(95)
}

fn verify_or_delete(entry: &ReleaseEntry, path: &Path) -> Result<(), UpdateError> {
    let (actual_sha1, actual_size) = sha1_file(path)
        .map_err(|error| UpdateError::io_with_path("failed to hash release package", path, &error))?;

    if actual_size == entry.filesize() && digests_match(entry.sha1(), &actual_sha1) {
        return Ok(());
    }

    warn!(
        "Checksum failed for {}: expected {} ({} bytes), got {actual_sha1} ({actual_size} bytes)",
        path.display(),
        entry.sha1(),
        entry.filesize()
    );
    if let Err(error) = std::fs::remove_file(path) {
        warn!("Failed to delete corrupt package {}: {error}", path.display());
    }

    Err(UpdateError::ChecksumFailed {
        file: path.display().to_string(),
        expected: format!("{} ({} bytes)", entry.sha1(), entry.filesize()),
        actual: format!("{actual_sha1} ({actual_size} bytes)"),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::received_percent;

    #[test]
    fn received_bytes_map_onto_the_transfer_range() {
        let received = [AtomicU64::new(0), AtomicU64::new(0)];
        assert_eq!(received_percent(&received, 400), 0);

        received[0].store(100, Ordering::Relaxed);
        assert_eq!(received_percent(&received, 400), 23);

        received[1].store(300, Ordering::Relaxed);
        assert_eq!(received_percent(&received, 400), 95);
    }

    #[test]
    fn empty_batches_count_as_transferred() {
        assert_eq!(received_percent(&[], 0), 95);
    }
}
