use std::path::PathBuf;

use log::{error, info, warn};
use molt_platform::{InstallPaths, Removal, UpdateLock, executables_in};
use molt_release::{ReleaseEntry, find_current_release};

use crate::error::UpdateError;
use crate::logging::init_logging;
use crate::manager::{ManagerOptions, UpdateManager};
use crate::progress::ProgressReporter;
use crate::source::UpdateSource;

/// First-run installer: brings the installation up to the release bundled
/// next to the setup program, then optionally on to the newest release of a
/// remote source.
pub struct Installer {
    paths: InstallPaths,
    bundled_dir: PathBuf,
    remote: Option<UpdateSource>,
    options: ManagerOptions,
}

impl Installer {
    #[must_use]
    pub fn new(paths: InstallPaths, bundled_dir: impl Into<PathBuf>, options: ManagerOptions) -> Self {
        Self {
            paths,
            bundled_dir: bundled_dir.into(),
            remote: None,
            options,
        }
    }

    /// Installer with the production collaborators for `paths`, logging to
    /// the installation's `molt.log` from here on.
    pub fn open(paths: InstallPaths, bundled_dir: impl Into<PathBuf>) -> Result<Self, UpdateError> {
        let options = ManagerOptions::for_paths(&paths)?;
        init_logging(&paths, &options.settings);
        Ok(Self::new(paths, bundled_dir, options))
    }

    #[must_use]
    pub fn with_remote(mut self, source: UpdateSource) -> Self {
        self.remote = Some(source);
        self
    }

    /// Install, returning the executables of the installed version. Each
    /// phase that fails is retried once with delta releases ignored; a remote
    /// phase that still fails leaves the bundled release in place.
    ///
    /// # Errors
    /// Returns the error of the bundled phase's full-release retry, or
    /// [`UpdateError::Cancelled`] without retrying.
    pub async fn execute_install(
        &self,
        progress: &ProgressReporter,
    ) -> Result<Vec<PathBuf>, UpdateError> {
        let bundled = self.bundled_manager();
        let lock = bundled.acquire_update_lock().await?;

        info!(
            "Installing {} from bundled releases in {}",
            self.paths.app_name,
            self.bundled_dir.display()
        );
        let bundled_progress = progress.scaled(0, 33);
        let mut executables =
            match update_with_fallback(&bundled, &lock, &bundled_progress).await? {
                Some(executables) => executables,
                None => self.current_executables(&bundled).await?,
            };
        bundled_progress.report(100);

        if let Some(remote) = &self.remote {
            let manager = UpdateManager::new(remote.clone(), self.paths.clone(), self.options.clone());
            match update_with_fallback(&manager, &lock, &progress.scaled(33, 67)).await {
                Ok(Some(updated)) => executables = updated,
                Ok(None) => {}
                Err(UpdateError::Cancelled) => return Err(UpdateError::Cancelled),
                Err(update_error) => error!(
                    "Failed to update {} from {remote}, keeping the bundled release: {update_error}",
                    self.paths.app_name
                ),
            }
        }

        progress.report(100);
        Ok(executables)
    }

    pub async fn execute_uninstall(&self) -> Result<Removal, UpdateError> {
        let manager = self.bundled_manager();
        let lock = manager.acquire_update_lock().await?;
        manager.full_uninstall(&lock).await
    }

    fn bundled_manager(&self) -> UpdateManager {
        UpdateManager::new(
            UpdateSource::Directory(self.bundled_dir.clone()),
            self.paths.clone(),
            self.options.clone(),
        )
    }

    async fn current_executables(&self, manager: &UpdateManager) -> Result<Vec<PathBuf>, UpdateError> {
        let local = manager.load_local_releases().await?;
        Ok(find_current_release(&local)
            .and_then(ReleaseEntry::version)
            .map(|version| executables_in(&self.paths.version_dir(&version)))
            .unwrap_or_default())
    }
}

/// [`update_once`], repeated with full releases only when the first pass
/// fails. Both passes report through `progress`, which never moves back.
async fn update_with_fallback(
    manager: &UpdateManager,
    lock: &UpdateLock,
    progress: &ProgressReporter,
) -> Result<Option<Vec<PathBuf>>, UpdateError> {
    let ignore_delta_updates = manager.settings().ignore_delta_updates;
    match update_once(manager, lock, ignore_delta_updates, progress).await {
        Err(error) if !ignore_delta_updates && !matches!(error, UpdateError::Cancelled) => {
            warn!(
                "Update from {} failed, retrying with full releases only: {error}",
                manager.source()
            );
            update_once(manager, lock, true, progress).await
        }
        result => result,
    }
}

async fn update_once(
    manager: &UpdateManager,
    lock: &UpdateLock,
    ignore_delta_updates: bool,
    progress: &ProgressReporter,
) -> Result<Option<Vec<PathBuf>>, UpdateError> {
    let Some(update) = manager
        .check_for_update(lock, ignore_delta_updates, &progress.scaled(0, 33))
        .await?
    else {
        return Ok(None);
    };

    manager
        .download_releases(lock, update.releases_to_apply(), &progress.scaled(33, 33))
        .await?;
    let outcome = manager
        .apply_releases(lock, &update, &progress.scaled(66, 34))
        .await?;
    Ok(Some(outcome.executables))
}
