use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use molt_package::{PackageError, fold_delta_chain, install_package_files};
use molt_platform::fs::delete_directory;
use molt_platform::{Removal, UpdateLock, executables_in, remove_or_defer, version_of_dir};
use molt_release::{ReleaseEntry, ReleaseVersion, UpdateInfo, rebuild_manifest};

use super::{UpdateManager, blocking};
use crate::error::UpdateError;
use crate::hooks::HookRequest;
use crate::progress::ProgressReporter;
use crate::shortcuts::ShortcutRequest;
use crate::state::UpdaterState;

/// What [`UpdateManager::apply_releases`] installed.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub version: ReleaseVersion,
    pub release: ReleaseEntry,
    pub version_dir: PathBuf,
    pub executables: Vec<PathBuf>,
    /// Shortcuts an earlier version wanted but the user had deleted.
    pub ignored_shortcuts: Vec<ShortcutRequest>,
    pub deferred: Vec<PathBuf>,
}

type OldShortcuts = HashMap<PathBuf, Vec<ShortcutRequest>>;

impl UpdateManager {
    /// Install `update` into a new `app-<version>` directory, run its hooks,
    /// repair shortcuts, retire older versions, and finally rewrite the
    /// local ledger. Until that last step the ledger still describes the
    /// previous installation, so an interrupted apply can simply be retried
    /// from [`check_for_update`](Self::check_for_update).
    ///
    /// # Errors
    /// Returns the first error from materializing, installing, an install
    /// hook, the shortcut store, or the ledger rewrite. Failures while
    /// retiring old versions are logged only.
    pub async fn apply_releases(
        &self,
        lock: &UpdateLock,
        update: &UpdateInfo,
        progress: &ProgressReporter,
    ) -> Result<ApplyOutcome, UpdateError> {
        self.ensure_lock(lock)?;
        self.run_phase(UpdaterState::Applying, self.apply_locked(update, progress))
            .await
    }

    async fn apply_locked(
        &self,
        update: &UpdateInfo,
        progress: &ProgressReporter,
    ) -> Result<ApplyOutcome, UpdateError> {
        progress.report(0);
        let version = update.future_version().ok_or_else(|| {
            UpdateError::Invalid(format!(
                "release {} carries no version",
                update.future().filename()
            ))
        })?;
        let version_dir = self.version_dir_for(&version);

        self.clean_dead_versions(update.current_version(), &version_dir)
            .await;
        progress.report(10);
        self.check_cancelled()?;

        let release = self.materialize(update).await?;
        progress.report(50);
        self.check_cancelled()?;

        self.install_version(&release, &version_dir).await?;
        progress.report(70);
        self.check_cancelled()?;

        let old_dirs = self.old_version_dirs(&version_dir)?;
        let old_shortcuts = self.old_shortcut_lists(&old_dirs).await;
        let (wanted, ignored) = self
            .run_post_install(update, &version, &version_dir, &old_shortcuts)
            .await?;
        progress.report(85);
        self.check_cancelled()?;

        self.fix_pinned_shortcuts(&old_dirs, &version_dir)?;
        progress.report(90);
        self.check_cancelled()?;

        let deferred = self
            .clean_old_versions(&old_dirs, &old_shortcuts, &wanted)
            .await;
        progress.report(95);

        self.persist_manifest().await?;
        progress.report(100);

        info!("Installed {} {version}", self.paths.app_name);
        Ok(ApplyOutcome {
            executables: executables_in(&version_dir),
            version,
            release,
            version_dir,
            ignored_shortcuts: ignored.into_iter().collect(),
            deferred,
        })
    }

    /// Remove `app-*` directories left behind by an earlier uninstall that
    /// did not finish. Only the recorded current version and the version
    /// being installed survive. Failures are logged.
    async fn clean_dead_versions(&self, current: Option<ReleaseVersion>, target_dir: &Path) {
        let keep: Vec<PathBuf> = current
            .map(|version| self.version_dir_for(&version))
            .into_iter()
            .chain(std::iter::once(target_dir.to_path_buf()))
            .collect();

        let dirs = match self.paths.version_dirs() {
            Ok(dirs) => dirs,
            Err(error) => {
                warn!("Could not list version directories: {error}");
                return;
            }
        };

        let dead: Vec<PathBuf> = dirs.into_iter().filter(|dir| !keep.contains(dir)).collect();
        if dead.is_empty() {
            return;
        }

        let policy = self.options.settings.retry_policy();
        let result = blocking("dead version cleanup failed", move || {
            for dir in &dead {
                info!("Removing dead version directory {}", dir.display());
                if let Err(error) = delete_directory(dir, &policy) {
                    warn!("Failed to remove dead version {}: {error}", dir.display());
                }
            }
            Ok(())
        })
        .await;
        if let Err(error) = result {
            warn!("{error}");
        }
    }

    async fn materialize(&self, update: &UpdateInfo) -> Result<ReleaseEntry, UpdateError> {
        let releases = update.releases_to_apply();
        if let [single] = releases
            && !single.is_delta()
        {
            return Ok(single.clone());
        }

        if !update.is_delta_chain() {
            let offending = releases
                .iter()
                .find(|entry| !entry.is_delta())
                .map_or_else(String::new, |entry| entry.filename().to_string());
            return Err(PackageError::MixedReleaseKinds {
                filename: offending,
            }
            .into());
        }

        let Some(base) = update.current().cloned() else {
            return Err(UpdateError::Invalid(
                "a delta chain needs an installed full release to apply to".to_string(),
            ));
        };

        let packages_dir = self.paths.packages_dir();
        let chain = releases.to_vec();
        info!(
            "Applying {} delta release(s) on top of {}",
            chain.len(),
            base.filename()
        );
        blocking("delta fold failed", move || {
            fold_delta_chain(&packages_dir, &base, &chain).map_err(UpdateError::from)
        })
        .await
    }

    async fn install_version(
        &self,
        release: &ReleaseEntry,
        version_dir: &Path,
    ) -> Result<(), UpdateError> {
        let package = self.package_path(release);
        let target = version_dir.to_path_buf();
        let profile = self.options.profile;

        info!("Installing {} into {}", release.filename(), target.display());
        let installed = blocking("package install failed", move || {
            install_package_files(&package, &target, profile).map_err(UpdateError::from)
        })
        .await?;
        debug!("Installed {} file(s)", installed.len());
        Ok(())
    }

    fn old_version_dirs(&self, version_dir: &Path) -> Result<Vec<PathBuf>, UpdateError> {
        let dirs = self.paths.version_dirs().map_err(|error| {
            UpdateError::io_with_path("failed to list version directories", &self.paths.app_root, &error)
        })?;
        Ok(dirs.into_iter().filter(|dir| dir != version_dir).collect())
    }

    async fn old_shortcut_lists(&self, old_dirs: &[PathBuf]) -> OldShortcuts {
        let mut lists = OldShortcuts::new();
        for dir in old_dirs {
            let mut requests = Vec::new();
            for module in self.options.hook_discovery.discover(dir) {
                match self
                    .options
                    .hook_runner
                    .run(&module, &HookRequest::ShortcutList)
                    .await
                {
                    Ok(response) => requests.extend(response.shortcuts),
                    Err(error) => warn!(
                        "Could not get shortcut list from {}: {error}",
                        module.display()
                    ),
                }
            }
            lists.insert(dir.clone(), requests);
        }
        lists
    }

    async fn run_post_install(
        &self,
        update: &UpdateInfo,
        version: &ReleaseVersion,
        version_dir: &Path,
        old_shortcuts: &OldShortcuts,
    ) -> Result<(HashSet<ShortcutRequest>, HashSet<ShortcutRequest>), UpdateError> {
        let store = &self.options.shortcuts;
        let ignored: HashSet<ShortcutRequest> = old_shortcuts
            .values()
            .flatten()
            .filter(|request| !store.exists(request))
            .cloned()
            .collect();

        let modules = self.options.hook_discovery.discover(version_dir);
        let version = version.to_string();
        let mut wanted = HashSet::new();

        for module in &modules {
            if update.is_bootstrapping() {
                self.run_hook(
                    module,
                    &HookRequest::AppInstall {
                        version: version.clone(),
                    },
                )
                .await?;
            }
            self.run_hook(
                module,
                &HookRequest::VersionInstalled {
                    version: version.clone(),
                },
            )
            .await?;

            let response = self.run_hook(module, &HookRequest::ShortcutList).await?;
            for request in response.shortcuts {
                if ignored.contains(&request) {
                    info!("Not recreating shortcut {}, it was removed by the user", request.title);
                } else {
                    store.create(&request)?;
                }
                wanted.insert(request);
            }
        }

        Ok((wanted, ignored))
    }

    async fn run_hook(
        &self,
        module: &Path,
        request: &HookRequest,
    ) -> Result<crate::hooks::HookResponse, UpdateError> {
        self.options
            .hook_runner
            .run(module, request)
            .await
            .map_err(|source| {
                error!(
                    "{} hook in {} failed: {source}",
                    request.name(),
                    module.display()
                );
                UpdateError::Hook {
                    module: module.to_path_buf(),
                    source,
                }
            })
    }

    fn fix_pinned_shortcuts(
        &self,
        old_dirs: &[PathBuf],
        version_dir: &Path,
    ) -> Result<(), UpdateError> {
        let store = &self.options.shortcuts;
        for shortcut in store.pinned()? {
            let Some(old_dir) = old_dirs.iter().find(|dir| shortcut.target.starts_with(dir)) else {
                continue;
            };
            let Ok(relative) = shortcut.target.strip_prefix(old_dir) else {
                continue;
            };

            let new_target = version_dir.join(relative);
            if new_target.exists() {
                let working_directory = shortcut.working_directory.as_deref().map(|dir| {
                    dir.strip_prefix(old_dir)
                        .map_or_else(|_| dir.to_path_buf(), |rest| version_dir.join(rest))
                });
                info!(
                    "Retargeting pinned shortcut {} to {}",
                    shortcut.path.display(),
                    new_target.display()
                );
                store.retarget(&shortcut, &new_target, working_directory.as_deref())?;
            } else {
                info!(
                    "Unpinning {}, {} is gone in the new version",
                    shortcut.path.display(),
                    relative.display()
                );
                store.unpin(&shortcut)?;
            }
        }
        Ok(())
    }

    async fn clean_old_versions(
        &self,
        old_dirs: &[PathBuf],
        old_shortcuts: &OldShortcuts,
        wanted: &HashSet<ShortcutRequest>,
    ) -> Vec<PathBuf> {
        let store = &self.options.shortcuts;
        let mut deferred = Vec::new();

        for dir in old_dirs {
            let version = version_of_dir(dir).unwrap_or_default();
            for module in self.options.hook_discovery.discover(dir) {
                let request = HookRequest::VersionUninstalling {
                    version: version.clone(),
                };
                if let Err(error) = self.options.hook_runner.run(&module, &request).await {
                    warn!(
                        "version_uninstalling hook in {} failed: {error}",
                        module.display()
                    );
                }
            }

            for request in old_shortcuts.get(dir).into_iter().flatten() {
                if wanted.contains(request) || !store.exists(request) {
                    continue;
                }
                if let Err(error) = store.remove(request) {
                    warn!("Failed to remove old shortcut {}: {error}", request.title);
                }
            }

            let path = dir.clone();
            let policy = self.options.settings.retry_policy();
            let ledger = self.deferred.clone();
            let removal = blocking("old version removal failed", move || {
                remove_or_defer(&path, &policy, &ledger).map_err(UpdateError::from)
            })
            .await;

            match removal {
                Ok(Removal::Removed) => info!("Removed old version {}", dir.display()),
                Ok(Removal::Deferred) => deferred.push(dir.clone()),
                Err(error) => warn!("Failed to remove old version {}: {error}", dir.display()),
            }
        }

        deferred
    }

    async fn persist_manifest(&self) -> Result<(), UpdateError> {
        let packages_dir = self.paths.packages_dir();
        let entries = blocking("release manifest rebuild failed", move || {
            rebuild_manifest(&packages_dir).map_err(UpdateError::from)
        })
        .await?;
        debug!("Local release manifest now lists {} release(s)", entries.len());
        Ok(())
    }
}
