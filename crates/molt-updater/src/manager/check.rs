use log::{info, warn};
use molt_platform::UpdateLock;
use molt_platform::fs::delete_directory;
use molt_release::{ReleaseEntry, ReleaseError, UpdateInfo, parse_manifest, resolve_from_text};

use super::{UpdateManager, blocking};
use crate::error::UpdateError;
use crate::progress::ProgressReporter;
use crate::source::SourceLocation;
use crate::state::UpdaterState;

impl UpdateManager {
    /// Compare the local ledger with the source's and pick the releases
    /// that move this installation forward. `None` means already current.
    pub async fn check_for_update(
        &self,
        lock: &UpdateLock,
        ignore_delta_updates: bool,
        progress: &ProgressReporter,
    ) -> Result<Option<UpdateInfo>, UpdateError> {
        self.ensure_lock(lock)?;
        self.run_phase(
            UpdaterState::CheckingForUpdate,
            self.check_locked(ignore_delta_updates, progress),
        )
        .await
    }

    async fn check_locked(
        &self,
        ignore_delta_updates: bool,
        progress: &ProgressReporter,
    ) -> Result<Option<UpdateInfo>, UpdateError> {
        progress.report(0);
        let local = self.load_local_releases().await?;
        progress.report(33);

        self.check_cancelled()?;
        let remote = self.fetch_remote_manifest().await?;
        progress.report(66);

        let ignore_delta_updates = ignore_delta_updates || self.options.settings.ignore_delta_updates;
        let update = resolve_from_text(&local, &remote, ignore_delta_updates)?;
        match &update {
            Some(update) => info!(
                "Update available from {}: {} release(s) to apply, target {}",
                self.source,
                update.releases_to_apply().len(),
                update.future().filename()
            ),
            None => info!("{} is up to date with {}", self.paths.app_name, self.source),
        }

        progress.report(100);
        Ok(update)
    }

    /// The local ledger. A missing one means a first install; an unreadable
    /// one is discarded along with the package directory so the install
    /// bootstraps from scratch.
    pub(crate) async fn load_local_releases(&self) -> Result<Vec<ReleaseEntry>, UpdateError> {
        let manifest = self.paths.local_manifest();
        let packages_dir = self.paths.packages_dir();

        let entries = match tokio::fs::read_to_string(&manifest).await {
            Ok(text) => match parse_manifest(&text) {
                Ok(entries) => Some(entries),
                Err(error) => {
                    warn!("Local releases {} are corrupt: {error}", manifest.display());
                    None
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                info!("No local releases at {}, treating as first install", manifest.display());
                Some(Vec::new())
            }
            Err(error) => {
                warn!("Failed to read local releases {}: {error}", manifest.display());
                None
            }
        };

        if let Some(entries) = entries {
            tokio::fs::create_dir_all(&packages_dir).await.map_err(|error| {
                UpdateError::io_with_path("failed to create package directory", &packages_dir, &error)
            })?;
            return Ok(entries);
        }

        warn!("Recreating {} and starting from scratch", packages_dir.display());
        let policy = self.options.settings.retry_policy();
        blocking("package directory reset failed", move || {
            delete_directory(&packages_dir, &policy).map_err(|error| {
                UpdateError::io_with_path("failed to reset package directory", &packages_dir, &error)
            })?;
            std::fs::create_dir_all(&packages_dir).map_err(|error| {
                UpdateError::io_with_path("failed to create package directory", &packages_dir, &error)
            })
        })
        .await?;
        Ok(Vec::new())
    }

    async fn fetch_remote_manifest(&self) -> Result<String, UpdateError> {
        let text = match self.source.manifest() {
            SourceLocation::Url(url) => {
                info!("Fetching release manifest from {url}");
                let body = self.options.downloader.fetch(&url).await?;
                String::from_utf8(body).map_err(|error| {
                    UpdateError::Release(ReleaseError::CorruptRemoteManifest {
                        reason: format!("not UTF-8: {error}"),
                    })
                })?
            }
            SourceLocation::Path(path) => {
                info!("Reading release manifest from {}", path.display());
                tokio::fs::read_to_string(&path).await.map_err(|error| {
                    UpdateError::io_with_path("failed to read release manifest", &path, &error)
                })?
            }
        };
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }
}
