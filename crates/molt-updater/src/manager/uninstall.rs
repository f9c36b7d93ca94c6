use log::{info, warn};
use molt_platform::{Removal, UpdateLock, remove_or_defer, version_of_dir};
use molt_release::{ReleaseEntry, find_current_release};

use super::{UpdateManager, blocking};
use crate::error::UpdateError;
use crate::hooks::HookRequest;
use crate::state::UpdaterState;

impl UpdateManager {
    /// Run every version's uninstall hooks, remove the shortcuts they
    /// report, and delete the whole installation root. Hook and shortcut
    /// failures are logged; only a root that can neither be deleted nor
    /// scheduled for deletion fails the call.
    ///
    /// # Errors
    /// Returns [`UpdateError::Platform`] when the deferred-delete fallback
    /// fails too.
    pub async fn full_uninstall(&self, lock: &UpdateLock) -> Result<Removal, UpdateError> {
        self.ensure_lock(lock)?;
        self.run_phase(UpdaterState::Applying, self.uninstall_locked())
            .await
    }

    async fn uninstall_locked(&self) -> Result<Removal, UpdateError> {
        let local = self.load_local_releases().await.unwrap_or_else(|error| {
            warn!("Could not read local releases before uninstall: {error}");
            Vec::new()
        });
        let current_dir = find_current_release(&local)
            .and_then(ReleaseEntry::version)
            .map(|version| self.version_dir_for(&version));

        let dirs = self.paths.version_dirs().unwrap_or_else(|error| {
            warn!("Could not list version directories: {error}");
            Vec::new()
        });

        let store = &self.options.shortcuts;
        for dir in &dirs {
            let version = version_of_dir(dir).unwrap_or_default();
            for module in self.options.hook_discovery.discover(dir) {
                let mut requests = Vec::new();
                if current_dir.as_ref() == Some(dir) {
                    requests.push(HookRequest::AppUninstall {
                        version: version.clone(),
                    });
                }
                requests.push(HookRequest::VersionUninstalling {
                    version: version.clone(),
                });

                for request in &requests {
                    if let Err(error) = self.options.hook_runner.run(&module, request).await {
                        warn!("{} hook in {} failed: {error}", request.name(), module.display());
                    }
                }

                match self
                    .options
                    .hook_runner
                    .run(&module, &HookRequest::ShortcutList)
                    .await
                {
                    Ok(response) => {
                        for shortcut in &response.shortcuts {
                            if let Err(error) = store.remove(shortcut) {
                                warn!("Failed to remove shortcut {}: {error}", shortcut.title);
                            }
                        }
                    }
                    Err(error) => warn!(
                        "Could not get shortcut list from {}: {error}",
                        module.display()
                    ),
                }
            }
        }

        match store.pinned() {
            Ok(pinned) => {
                for shortcut in pinned
                    .iter()
                    .filter(|shortcut| shortcut.target.starts_with(&self.paths.app_root))
                {
                    if let Err(error) = store.unpin(shortcut) {
                        warn!("Failed to unpin {}: {error}", shortcut.path.display());
                    }
                }
            }
            Err(error) => warn!("Could not list pinned shortcuts: {error}"),
        }

        let root = self.paths.app_root.clone();
        let policy = self.options.settings.retry_policy();
        let ledger = self.deferred.clone();
        let removal = blocking("installation removal failed", move || {
            remove_or_defer(&root, &policy, &ledger).map_err(UpdateError::from)
        })
        .await?;

        info!("Uninstalled {} ({removal:?})", self.paths.app_name);
        Ok(removal)
    }
}
