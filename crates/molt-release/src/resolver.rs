use log::{info, warn};

use crate::entry::ReleaseEntry;
use crate::error::ReleaseError;
use crate::manifest::parse_manifest;
use crate::version::ReleaseVersion;

/// The releases selected to move an installation forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    current: Option<ReleaseEntry>,
    future: ReleaseEntry,
    releases_to_apply: Vec<ReleaseEntry>,
}

impl UpdateInfo {
    /// `current` is `None` when bootstrapping a fresh install.
    pub fn new(
        current: Option<ReleaseEntry>,
        mut releases_to_apply: Vec<ReleaseEntry>,
    ) -> Result<Self, ReleaseError> {
        releases_to_apply.sort_by_key(ReleaseEntry::version);
        let future = releases_to_apply
            .last()
            .cloned()
            .ok_or(ReleaseError::NoReleasesToApply)?;

        Ok(Self {
            current,
            future,
            releases_to_apply,
        })
    }

    #[must_use]
    pub fn current(&self) -> Option<&ReleaseEntry> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn current_version(&self) -> Option<ReleaseVersion> {
        self.current.as_ref().and_then(ReleaseEntry::version)
    }

    #[must_use]
    pub fn future(&self) -> &ReleaseEntry {
        &self.future
    }

    #[must_use]
    pub fn future_version(&self) -> Option<ReleaseVersion> {
        self.future.version()
    }

    /// Either exactly one full release or an ascending chain of deltas.
    #[must_use]
    pub fn releases_to_apply(&self) -> &[ReleaseEntry] {
        &self.releases_to_apply
    }

    #[must_use]
    pub fn is_bootstrapping(&self) -> bool {
        self.current.is_none()
    }

    #[must_use]
    pub fn is_delta_chain(&self) -> bool {
        self.releases_to_apply.iter().all(ReleaseEntry::is_delta)
    }
}

/// The installed version: the highest-versioned full entry of the local
/// ledger. A ledger holding only deltas has no current version.
#[must_use]
pub fn find_current_release(local: &[ReleaseEntry]) -> Option<&ReleaseEntry> {
    local
        .iter()
        .filter(|entry| !entry.is_delta())
        .max_by_key(|entry| entry.version())
}

fn latest_full_release(remote: &[ReleaseEntry]) -> Result<&ReleaseEntry, ReleaseError> {
    remote
        .iter()
        .filter(|entry| !entry.is_delta())
        .max_by_key(|entry| entry.version())
        .ok_or(ReleaseError::NoFullRelease)
}

/// Decide which remote releases move `local` forward.
///
/// Returns `Ok(None)` when both ledgers hold the same number of entries.
/// That is a count comparison, not a set comparison: two different ledgers
/// of equal length are treated as already current.
pub fn resolve(
    local: &[ReleaseEntry],
    remote: &[ReleaseEntry],
    ignore_delta_updates: bool,
) -> Result<Option<UpdateInfo>, ReleaseError> {
    if local.len() == remote.len() {
        info!("No updates, remote and local are the same");
        return Ok(None);
    }

    let remote: Vec<ReleaseEntry> = if ignore_delta_updates {
        remote.iter().filter(|entry| !entry.is_delta()).cloned().collect()
    } else {
        remote.to_vec()
    };

    let latest_full = latest_full_release(&remote)?;
    let Some(current) = find_current_release(local) else {
        warn!("First run or local directory is corrupt, starting from scratch");
        return UpdateInfo::new(None, vec![latest_full.clone()]).map(Some);
    };

    let current_version = current.version();
    let remote_max = remote.iter().filter_map(ReleaseEntry::version).max();
    if current_version >= remote_max {
        warn!(
            "Local version {} is not older than remote {}, reinstalling latest full release",
            display_version(current_version),
            display_version(remote_max)
        );
        return UpdateInfo::new(Some(current.clone()), vec![latest_full.clone()]).map(Some);
    }

    let newer_deltas: Vec<ReleaseEntry> = remote
        .iter()
        .filter(|entry| entry.is_delta() && entry.version() > current_version)
        .cloned()
        .collect();
    let delta_total: u64 = newer_deltas.iter().map(ReleaseEntry::filesize).sum();

    let selected = if delta_total > 0 && delta_total < latest_full.filesize() {
        info!(
            "Applying {} delta releases ({delta_total} bytes) instead of {} ({} bytes)",
            newer_deltas.len(),
            latest_full.filename(),
            latest_full.filesize()
        );
        newer_deltas
    } else {
        vec![latest_full.clone()]
    };

    UpdateInfo::new(Some(current.clone()), selected).map(Some)
}

pub fn resolve_from_text(
    local: &[ReleaseEntry],
    remote_text: &str,
    ignore_delta_updates: bool,
) -> Result<Option<UpdateInfo>, ReleaseError> {
    let remote = parse_manifest(remote_text).map_err(|error| {
        warn!("Release information couldn't be determined due to remote corrupt RELEASES file");
        ReleaseError::CorruptRemoteManifest {
            reason: error.to_string(),
        }
    })?;
    resolve(local, &remote, ignore_delta_updates)
}

fn display_version(version: Option<ReleaseVersion>) -> String {
    version.map_or_else(|| "(none)".to_string(), |version| version.to_string())
}

#[cfg(test)]
mod tests {
    use super::{UpdateInfo, find_current_release, resolve, resolve_from_text};
    use crate::entry::ReleaseEntry;
    use crate::error::ReleaseError;
    use crate::version::ReleaseVersion;

    fn entry(filename: &str, size: u64) -> ReleaseEntry {
        ReleaseEntry::new("94689FEDE03FED7AB59C24337673A27837F0C3EC", filename, size)
            .expect("fixture entry should be valid")
    }

    #[test]
    fn prefers_small_delta_over_full() {
        let local = vec![entry("MyApp-1.0-full.nupkg", 480_000)];
        let remote = vec![
            entry("MyApp-1.0-full.nupkg", 480_000),
            entry("MyApp-1.1-delta.nupkg", 1_024),
            entry("MyApp-1.1-full.nupkg", 500_000),
        ];

        let info = resolve(&local, &remote, false)
            .expect("resolve should succeed")
            .expect("an update should be available");

        assert_eq!(info.releases_to_apply(), &[entry("MyApp-1.1-delta.nupkg", 1_024)]);
        assert!(info.is_delta_chain());
        assert_eq!(info.current_version(), Some(ReleaseVersion::new(1, 0)));
        assert_eq!(info.future_version(), Some(ReleaseVersion::new(1, 1)));
    }

    #[test]
    fn selects_full_when_no_delta_present() {
        let local = vec![entry("MyApp-1.0-full.nupkg", 480_000)];
        let remote = vec![
            entry("MyApp-1.0-full.nupkg", 480_000),
            entry("MyApp-1.1-full.nupkg", 500_000),
        ];

        let info = resolve(&local, &remote, false)
            .expect("resolve should succeed")
            .expect("an update should be available");

        assert_eq!(info.releases_to_apply(), &[entry("MyApp-1.1-full.nupkg", 500_000)]);
        assert!(!info.is_bootstrapping());
    }

    #[test]
    fn selects_full_when_deltas_are_larger() {
        let local = vec![entry("MyApp-1.0-full.nupkg", 1_000)];
        let remote = vec![
            entry("MyApp-1.0-full.nupkg", 1_000),
            entry("MyApp-1.1-delta.nupkg", 900),
            entry("MyApp-1.2-delta.nupkg", 900),
            entry("MyApp-1.2-full.nupkg", 1_500),
        ];

        let info = resolve(&local, &remote, false)
            .expect("resolve should succeed")
            .expect("an update should be available");

        assert_eq!(info.releases_to_apply(), &[entry("MyApp-1.2-full.nupkg", 1_500)]);
    }

    #[test]
    fn delta_chain_is_ordered_by_version() {
        let local = vec![entry("MyApp-1.0-full.nupkg", 1_000)];
        let remote = vec![
            entry("MyApp-1.0-full.nupkg", 1_000),
            entry("MyApp-1.2-delta.nupkg", 20),
            entry("MyApp-1.1-delta.nupkg", 10),
            entry("MyApp-1.2-full.nupkg", 1_500),
        ];

        let info = resolve(&local, &remote, false)
            .expect("resolve should succeed")
            .expect("an update should be available");

        let names: Vec<_> = info
            .releases_to_apply()
            .iter()
            .map(ReleaseEntry::filename)
            .collect();
        assert_eq!(names, vec!["MyApp-1.1-delta.nupkg", "MyApp-1.2-delta.nupkg"]);
    }

    #[test]
    fn same_entry_count_means_no_update() {
        let local = vec![entry("MyApp-1.0-full.nupkg", 1_000)];
        let remote = vec![entry("MyApp-2.0-full.nupkg", 2_000)];

        assert!(resolve(&local, &remote, false).expect("resolve should succeed").is_none());
    }

    #[test]
    fn bootstrap_selects_latest_full() {
        let remote = vec![
            entry("MyApp-1.0-full.nupkg", 1_000),
            entry("MyApp-1.1-delta.nupkg", 10),
            entry("MyApp-1.1-full.nupkg", 1_100),
        ];

        let info = resolve(&[], &remote, false)
            .expect("resolve should succeed")
            .expect("an update should be available");

        assert!(info.is_bootstrapping());
        assert_eq!(info.releases_to_apply(), &[entry("MyApp-1.1-full.nupkg", 1_100)]);
    }

    #[test]
    fn ignore_delta_updates_forces_full() {
        let local = vec![entry("MyApp-1.0-full.nupkg", 480_000)];
        let remote = vec![
            entry("MyApp-1.0-full.nupkg", 480_000),
            entry("MyApp-1.1-delta.nupkg", 1_024),
            entry("MyApp-1.1-full.nupkg", 500_000),
        ];

        let info = resolve(&local, &remote, true)
            .expect("resolve should succeed")
            .expect("an update should be available");

        assert_eq!(info.releases_to_apply(), &[entry("MyApp-1.1-full.nupkg", 500_000)]);
    }

    #[test]
    fn local_newer_than_remote_reinstalls_latest_full() {
        let local = vec![
            entry("MyApp-1.0-full.nupkg", 1_000),
            entry("MyApp-2.0-full.nupkg", 2_000),
        ];
        let remote = vec![entry("MyApp-1.0-full.nupkg", 1_000)];

        let info = resolve(&local, &remote, false)
            .expect("resolve should succeed")
            .expect("a repair update should be proposed");

        assert_eq!(info.releases_to_apply(), &[entry("MyApp-1.0-full.nupkg", 1_000)]);
        assert_eq!(info.current_version(), Some(ReleaseVersion::new(2, 0)));
    }

    #[test]
    fn remote_without_full_release_fails() {
        let local = vec![entry("MyApp-1.0-full.nupkg", 1_000)];
        let remote = vec![
            entry("MyApp-1.1-delta.nupkg", 10),
            entry("MyApp-1.2-delta.nupkg", 10),
        ];

        assert!(matches!(
            resolve(&local, &remote, false),
            Err(ReleaseError::NoFullRelease)
        ));
    }

    #[test]
    fn corrupt_remote_text_is_reported() {
        assert!(matches!(
            resolve_from_text(&[], "definitely not a ledger", false),
            Err(ReleaseError::CorruptRemoteManifest { .. })
        ));
    }

    #[test]
    fn current_release_ignores_deltas() {
        let local = vec![
            entry("MyApp-1.0-full.nupkg", 1_000),
            entry("MyApp-1.1-delta.nupkg", 10),
        ];
        assert_eq!(
            find_current_release(&local).map(ReleaseEntry::filename),
            Some("MyApp-1.0-full.nupkg")
        );
        assert!(find_current_release(&[entry("MyApp-1.1-delta.nupkg", 10)]).is_none());
    }

    #[test]
    fn update_info_requires_releases() {
        assert!(matches!(
            UpdateInfo::new(None, Vec::new()),
            Err(ReleaseError::NoReleasesToApply)
        ));
    }
}
