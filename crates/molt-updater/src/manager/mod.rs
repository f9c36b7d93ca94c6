mod apply;
mod check;
mod download;
mod uninstall;

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use molt_package::FrameworkProfile;
use molt_platform::{DeferredDeletes, InstallPaths, UpdateLock};
use molt_release::ReleaseEntry;
use tokio_util::sync::CancellationToken;

use crate::download::{Downloader, HttpDownloader};
use crate::error::UpdateError;
use crate::logging::init_logging;
use crate::hooks::{HookDiscovery, HookRunner, MarkerDiscovery, ProcessHookRunner};
use crate::progress::ProgressReporter;
use crate::settings::UpdaterSettings;
use crate::shortcuts::{FileShortcutStore, ShortcutStore};
use crate::source::UpdateSource;
use crate::state::UpdaterState;

pub use apply::ApplyOutcome;

/// Collaborators and tunables shared by every manager of one installation.
#[derive(Clone)]
pub struct ManagerOptions {
    pub settings: UpdaterSettings,
    /// Framework profile to install; detected from each package when unset.
    pub profile: Option<FrameworkProfile>,
    pub lock_dir: PathBuf,
    pub downloader: Arc<dyn Downloader>,
    pub hook_runner: Arc<dyn HookRunner>,
    pub hook_discovery: Arc<dyn HookDiscovery>,
    pub shortcuts: Arc<dyn ShortcutStore>,
    pub cancel: CancellationToken,
}

impl ManagerOptions {
    /// Production collaborators for `paths`, with settings read from the
    /// installation's `settings.json`.
    pub fn for_paths(paths: &InstallPaths) -> Result<Self, UpdateError> {
        let settings = UpdaterSettings::load(&paths.settings_file());
        Ok(Self {
            downloader: Arc::new(HttpDownloader::new(&settings)?),
            hook_runner: Arc::new(ProcessHookRunner::new(settings.hook_timeout())),
            hook_discovery: Arc::new(MarkerDiscovery),
            shortcuts: Arc::new(FileShortcutStore::for_current_user(paths)),
            profile: None,
            lock_dir: default_lock_dir(),
            cancel: CancellationToken::new(),
            settings,
        })
    }

    /// Replace the settings. Collaborators already built from the old
    /// settings are kept.
    #[must_use]
    pub fn with_settings(mut self, settings: UpdaterSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: FrameworkProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    #[must_use]
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = downloader;
        self
    }

    #[must_use]
    pub fn with_hooks(
        mut self,
        runner: Arc<dyn HookRunner>,
        discovery: Arc<dyn HookDiscovery>,
    ) -> Self {
        self.hook_runner = runner;
        self.hook_discovery = discovery;
        self
    }

    #[must_use]
    pub fn with_shortcuts(mut self, shortcuts: Arc<dyn ShortcutStore>) -> Self {
        self.shortcuts = shortcuts;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

fn default_lock_dir() -> PathBuf {
    std::env::temp_dir().join("molt-locks")
}

/// Drives one installation from one update source.
///
/// Every mutating operation takes the [`UpdateLock`] returned by
/// [`acquire_update_lock`](Self::acquire_update_lock) and refuses to run
/// with a lock for a different install root. Releasing the lock is the
/// caller's drop.
pub struct UpdateManager {
    source: UpdateSource,
    paths: InstallPaths,
    options: ManagerOptions,
    deferred: DeferredDeletes,
    state: Mutex<UpdaterState>,
}

impl UpdateManager {
    #[must_use]
    pub fn new(source: UpdateSource, paths: InstallPaths, options: ManagerOptions) -> Self {
        let deferred = DeferredDeletes::new(paths.pending_deletes_file(), &paths.app_root);
        Self {
            source,
            paths,
            options,
            deferred,
            state: Mutex::new(UpdaterState::Idle),
        }
    }

    /// Manager with the production collaborators for `paths`, logging to
    /// the installation's `molt.log` from here on.
    pub fn open(source: UpdateSource, paths: InstallPaths) -> Result<Self, UpdateError> {
        let options = ManagerOptions::for_paths(&paths)?;
        init_logging(&paths, &options.settings);
        Ok(Self::new(source, paths, options))
    }

    #[must_use]
    pub fn source(&self) -> &UpdateSource {
        &self.source
    }

    #[must_use]
    pub fn paths(&self) -> &InstallPaths {
        &self.paths
    }

    #[must_use]
    pub fn settings(&self) -> &UpdaterSettings {
        &self.options.settings
    }

    #[must_use]
    pub fn state(&self) -> UpdaterState {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Take the cross-process lock for this installation, waiting up to the
    /// configured timeout, then retry any deletions deferred by earlier runs.
    ///
    /// # Errors
    /// Returns [`UpdateError::UpdateInProgress`] when another process keeps
    /// the lock past the timeout.
    pub async fn acquire_update_lock(&self) -> Result<UpdateLock, UpdateError> {
        let lock_dir = self.options.lock_dir.clone();
        let root = self.paths.app_root.clone();
        let timeout = self.options.settings.lock_timeout();

        let lock = tokio::task::spawn_blocking(move || UpdateLock::acquire(&lock_dir, &root, timeout))
            .await
            .map_err(|error| UpdateError::task("update lock task failed", error))??;

        {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *state == UpdaterState::Failed {
                debug!("Clearing failed state after acquiring update lock");
                *state = UpdaterState::Idle;
            }
        }

        let deferred = self.deferred.clone();
        let policy = self.options.settings.retry_policy();
        let swept = tokio::task::spawn_blocking(move || deferred.sweep(&policy))
            .await
            .map_err(|error| UpdateError::task("pending delete sweep failed", error))?;
        if !swept.is_empty() {
            info!("Removed {} previously deferred paths", swept.len());
        }

        Ok(lock)
    }

    #[must_use]
    pub fn sweep_pending_deletes(&self, lock: &UpdateLock) -> Vec<PathBuf> {
        if self.ensure_lock(lock).is_err() {
            warn!("Skipping pending delete sweep without the update lock");
            return Vec::new();
        }
        self.deferred.sweep(&self.options.settings.retry_policy())
    }

    /// Check, download, and apply in one locked pass. Returns the release
    /// now installed, or `None` when already current or when another
    /// process holds the lock.
    pub async fn update_app(
        &self,
        progress: &ProgressReporter,
    ) -> Result<Option<ReleaseEntry>, UpdateError> {
        let lock = match self.acquire_update_lock().await {
            Ok(lock) => lock,
            Err(error) if error.is_update_in_progress() => {
                info!("Skipping update, another process is updating {}", self.paths.app_root.display());
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let Some(update) = self
            .check_for_update(&lock, false, &progress.scaled(0, 33))
            .await?
        else {
            progress.report(100);
            return Ok(None);
        };

        self.download_releases(&lock, update.releases_to_apply(), &progress.scaled(33, 33))
            .await?;
        let outcome = self
            .apply_releases(&lock, &update, &progress.scaled(66, 34))
            .await?;

        drop(lock);
        Ok(Some(outcome.release))
    }

    fn ensure_lock(&self, lock: &UpdateLock) -> Result<(), UpdateError> {
        if lock.guards(&self.paths.app_root) {
            Ok(())
        } else {
            Err(UpdateError::LockNotHeld {
                root: self.paths.app_root.clone(),
            })
        }
    }

    fn check_cancelled(&self) -> Result<(), UpdateError> {
        if self.options.cancel.is_cancelled() {
            Err(UpdateError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, next: UpdaterState) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        debug!("Updater state {} -> {next}", *state);
        *state = next;
    }

    /// Run `phase` in state `busy`, then settle to `Idle`, or to `Failed`
    /// unless the caller cancelled.
    async fn run_phase<T, F>(&self, busy: UpdaterState, phase: F) -> Result<T, UpdateError>
    where
        F: Future<Output = Result<T, UpdateError>>,
    {
        self.set_state(busy);
        let result = phase.await;
        match &result {
            Ok(_) | Err(UpdateError::Cancelled) => self.set_state(UpdaterState::Idle),
            Err(_) => self.set_state(UpdaterState::Failed),
        }
        result
    }

    fn version_dir_for(&self, version: &impl std::fmt::Display) -> PathBuf {
        self.paths.version_dir(version)
    }

    fn package_path(&self, entry: &ReleaseEntry) -> PathBuf {
        self.paths.package_file(entry.filename())
    }
}

async fn blocking<T, F>(context: &'static str, work: F) -> Result<T, UpdateError>
where
    F: FnOnce() -> Result<T, UpdateError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| UpdateError::task(context, error))?
}
