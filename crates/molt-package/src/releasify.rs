use std::path::Path;

use log::{info, warn};
use molt_release::{
    MANIFEST_FILE_NAME, ReleaseEntry, find_current_release, read_manifest, rebuild_manifest,
};

use crate::delta::build_delta;
use crate::error::PackageError;
use crate::packager::ReleasePackager;

/// What a publish run added to the releases directory.
#[derive(Debug, Clone)]
pub struct ReleasifyOutput {
    pub full: ReleaseEntry,
    pub delta: Option<ReleaseEntry>,
    pub manifest: Vec<ReleaseEntry>,
}

/// Publish `packager`'s input into `releases_dir`: write the release
/// package, a delta against the newest full release already listed in the
/// directory's `RELEASES`, and a rebuilt `RELEASES` covering every artifact.
pub fn releasify(
    packager: &ReleasePackager,
    releases_dir: &Path,
    notes_transform: Option<&dyn Fn(&str) -> String>,
) -> Result<ReleasifyOutput, PackageError> {
    std::fs::create_dir_all(releases_dir).map_err(|error| {
        PackageError::io_with_path("failed to create releases directory", releases_dir, &error)
    })?;

    let manifest_path = releases_dir.join(MANIFEST_FILE_NAME);
    let previous = if manifest_path.exists() {
        let entries = read_manifest(&manifest_path)?;
        find_current_release(&entries).cloned()
    } else {
        None
    };

    let full_name = packager.suggested_release_file_name()?;
    let full_path = releases_dir.join(&full_name);
    packager.build_release_package(&full_path, notes_transform)?;

    let mut delta_path = None;
    if let Some(previous) = previous {
        let base_path = releases_dir.join(previous.filename());
        if previous.filename().eq_ignore_ascii_case(&full_name) {
            info!("{full_name} is already the newest full release, skipping delta");
        } else if base_path.is_file() {
            let path = releases_dir.join(packager.suggested_delta_file_name()?);
            info!("Building delta {} against {}", path.display(), base_path.display());
            build_delta(&base_path, &full_path, &path)?;
            delta_path = Some(path);
        } else {
            warn!(
                "{} is listed in {} but missing, skipping delta",
                previous.filename(),
                manifest_path.display()
            );
        }
    }

    let manifest = rebuild_manifest(releases_dir)?;
    let find = |path: &Path| {
        let name = path.file_name().and_then(std::ffi::OsStr::to_str);
        manifest
            .iter()
            .find(|entry| Some(entry.filename()) == name)
            .cloned()
    };

    let full = find(&full_path).ok_or_else(|| {
        PackageError::invalid(&full_path, "release package missing from rebuilt manifest")
    })?;
    let delta = delta_path.as_deref().and_then(find);

    Ok(ReleasifyOutput {
        full,
        delta,
        manifest,
    })
}
