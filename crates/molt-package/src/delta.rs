use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::Path;

use log::{debug, info, warn};
use molt_platform::fs::{files_recursively, to_archive_path};
use molt_release::{DELTA_SUFFIX, FULL_SUFFIX, ReleaseEntry, digests_match, sha1_bytes};
use tempfile::TempDir;

use crate::archive::{extract_zip, zip_directory};
use crate::content_types::ensure_delta_content_types;
use crate::error::PackageError;
use crate::metadata::{has_extension, remove_dependencies};

/// Reserved entry listing the `lib/` paths a delta deletes from its base.
pub const REMOVED_LIST: &str = "molt-delta/removed";

const DIFF_SUFFIX: &str = ".diff";
const SHASUM_SUFFIX: &str = ".shasum";

/// Build a delta package that turns `base` into `target`.
///
/// New `lib/` files are stored verbatim, unchanged ones are omitted and
/// changed ones become a `.diff` patch plus a `.shasum` of the expected
/// result. Everything outside `lib/` is taken from `target`.
pub fn build_delta(base: &Path, target: &Path, output: &Path) -> Result<(), PackageError> {
    let base_dir = scratch_dir()?;
    let target_dir = scratch_dir()?;
    let delta_dir = scratch_dir()?;

    extract_zip(base, base_dir.path())?;
    extract_zip(target, target_dir.path())?;

    let base_files = archive_paths(base_dir.path())?;
    let target_files = archive_paths(target_dir.path())?;

    for relative in &target_files {
        let source = target_dir.path().join(relative);
        let destination = delta_dir.path().join(relative);

        if !is_lib_path(relative) {
            if has_extension(relative, "nuspec") {
                let xml = read_text(&source)?;
                write_file(&destination, remove_dependencies(&xml)?.as_bytes())?;
            } else {
                copy_file(&source, &destination)?;
            }
            continue;
        }

        if !base_files.contains(relative) {
            info!("{relative} not found in base package, marking as new");
            copy_file(&source, &destination)?;
            continue;
        }

        let old_data = read_bytes(&base_dir.path().join(relative))?;
        let new_data = read_bytes(&source)?;
        if old_data == new_data {
            debug!("{relative} hasn't changed, omitting it");
            continue;
        }

        info!("Delta patching {relative}");
        let mut patch = Vec::new();
        qbsdiff::Bsdiff::new(&old_data, &new_data)
            .compare(Cursor::new(&mut patch))
            .map_err(|error| PackageError::io_with_path("failed to diff file", &source, &error))?;

        let name = relative.rsplit('/').next().unwrap_or(relative);
        let shasum = format!("{} {name} {}", sha1_bytes(&new_data), new_data.len());
        write_file(&suffixed(&destination, DIFF_SUFFIX), &patch)?;
        write_file(&suffixed(&destination, SHASUM_SUFFIX), shasum.as_bytes())?;
    }

    let removed: Vec<&str> = base_files
        .iter()
        .filter(|path| is_lib_path(path) && !target_files.contains(*path))
        .map(String::as_str)
        .collect();
    if !removed.is_empty() {
        debug!("{} files dropped since the base package", removed.len());
        write_file(&delta_dir.path().join(REMOVED_LIST), removed.join("\n").as_bytes())?;
    }

    ensure_delta_content_types(delta_dir.path())?;
    zip_directory(delta_dir.path(), output)?;

    info!(
        "Built delta {} from {} to {}",
        output.display(),
        base.display(),
        target.display()
    );
    Ok(())
}

/// Reconstruct the full package described by `delta` on top of `base`.
/// The output is only written once every patched file has been verified.
pub fn apply_delta(base: &Path, delta: &Path, output: &Path) -> Result<(), PackageError> {
    let work_dir = scratch_dir()?;
    let delta_dir = scratch_dir()?;

    extract_zip(base, work_dir.path())?;
    extract_zip(delta, delta_dir.path())?;

    let delta_files = archive_paths(delta_dir.path())?;
    for relative in &delta_files {
        if relative == REMOVED_LIST {
            continue;
        }

        if let Some(patched) = relative.strip_suffix(DIFF_SUFFIX)
            && delta_files.contains(&format!("{patched}{SHASUM_SUFFIX}"))
        {
            apply_patch(work_dir.path(), delta_dir.path(), patched)?;
            continue;
        }
        if let Some(patched) = relative.strip_suffix(SHASUM_SUFFIX)
            && delta_files.contains(&format!("{patched}{DIFF_SUFFIX}"))
        {
            continue;
        }

        debug!("Taking {relative} from the delta package");
        copy_file(
            &delta_dir.path().join(relative),
            &work_dir.path().join(relative),
        )?;
    }

    let removed_list = delta_dir.path().join(REMOVED_LIST);
    if removed_list.exists() {
        for relative in read_text(&removed_list)?.lines().map(str::trim) {
            if relative.is_empty() || !is_lib_path(relative) {
                continue;
            }
            let path = work_dir.path().join(relative);
            info!("{relative} was in the old package but not in the new one, deleting");
            if let Err(error) = std::fs::remove_file(&path)
                && error.kind() != std::io::ErrorKind::NotFound
            {
                return Err(PackageError::io_with_path(
                    "failed to remove dropped file",
                    &path,
                    &error,
                ));
            }
        }
    }

    zip_directory(work_dir.path(), output)?;
    info!(
        "Applied delta {} on top of {} into {}",
        delta.display(),
        base.display(),
        output.display()
    );
    Ok(())
}

/// Apply each delta of `chain` in turn, starting from the full release
/// `base`. Every intermediate full package is written to `package_dir`
/// under the delta's name with its delta suffix swapped for the full one.
pub fn fold_delta_chain(
    package_dir: &Path,
    base: &ReleaseEntry,
    chain: &[ReleaseEntry],
) -> Result<ReleaseEntry, PackageError> {
    if base.is_delta() {
        return Err(PackageError::MixedReleaseKinds {
            filename: base.filename().to_string(),
        });
    }
    if let Some(full) = chain.iter().find(|entry| !entry.is_delta()) {
        return Err(PackageError::MixedReleaseKinds {
            filename: full.filename().to_string(),
        });
    }
    if chain.is_empty() {
        return Ok(base.clone());
    }

    let mut current = package_dir.join(base.filename());
    for delta in chain {
        let output = package_dir.join(full_release_name(delta.filename()));
        apply_delta(&current, &package_dir.join(delta.filename()), &output)?;
        current = output;
    }

    Ok(ReleaseEntry::generate_from_file(&current)?)
}

#[must_use]
pub fn full_release_name(delta_filename: &str) -> String {
    let stem_len = delta_filename.len().saturating_sub(DELTA_SUFFIX.len());
    match (
        delta_filename.get(..stem_len),
        delta_filename.get(stem_len..),
    ) {
        (Some(stem), Some(suffix)) if suffix.eq_ignore_ascii_case(DELTA_SUFFIX) => {
            format!("{stem}{FULL_SUFFIX}")
        }
        _ => delta_filename.to_string(),
    }
}

fn apply_patch(work_dir: &Path, delta_dir: &Path, relative: &str) -> Result<(), PackageError> {
    let target = work_dir.join(relative);
    let diff_path = delta_dir.join(format!("{relative}{DIFF_SUFFIX}"));
    let shasum_path = delta_dir.join(format!("{relative}{SHASUM_SUFFIX}"));

    let (expected_sha1, expected_size) = parse_shasum(&read_text(&shasum_path)?)
        .ok_or_else(|| PackageError::invalid(&shasum_path, "malformed checksum entry"))?;
    let old_data = read_bytes(&target)?;
    let patch = read_bytes(&diff_path)?;

    info!("Applying diff to {relative}");
    let mut patched = Vec::new();
    let applied = qbsdiff::Bspatch::new(&patch)
        .and_then(|patcher| patcher.apply(&old_data, Cursor::new(&mut patched)));
    if let Err(error) = applied {
        warn!("Patch for {relative} could not be decoded: {error}");
        return Err(PackageError::ChecksumFailed {
            file: relative.to_string(),
            expected: expected_sha1,
            actual: format!("undecodable patch ({error})"),
        });
    }

    let actual_size = patched.len() as u64;
    if actual_size != expected_size {
        warn!(
            "Patched file {relative} has incorrect size, expected {expected_size}, got {actual_size}"
        );
        return Err(PackageError::ChecksumFailed {
            file: relative.to_string(),
            expected: format!("{expected_size} bytes"),
            actual: format!("{actual_size} bytes"),
        });
    }

    let actual_sha1 = sha1_bytes(&patched);
    if !digests_match(&expected_sha1, &actual_sha1) {
        warn!("Patched file {relative} has incorrect SHA1, expected {expected_sha1}, got {actual_sha1}");
        return Err(PackageError::ChecksumFailed {
            file: relative.to_string(),
            expected: expected_sha1,
            actual: actual_sha1,
        });
    }

    write_file(&target, &patched)
}

/// `<SHA1> <name> <size>`; the name may contain spaces.
fn parse_shasum(text: &str) -> Option<(String, u64)> {
    let mut tokens = text.split_whitespace();
    let sha1 = tokens.next()?;
    let size = tokens.next_back()?.parse().ok()?;
    Some((sha1.to_string(), size))
}

fn is_lib_path(relative: &str) -> bool {
    relative
        .split('/')
        .next()
        .is_some_and(|first| first.eq_ignore_ascii_case("lib"))
        && relative.contains('/')
}

fn suffixed(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    name.into()
}

fn scratch_dir() -> Result<TempDir, PackageError> {
    tempfile::tempdir().map_err(|source| PackageError::Io {
        context: "failed to create scratch directory",
        source,
    })
}

fn archive_paths(dir: &Path) -> Result<BTreeSet<String>, PackageError> {
    Ok(files_recursively(dir)
        .map_err(|error| PackageError::io_with_path("failed to list package contents", dir, &error))?
        .iter()
        .map(|relative| to_archive_path(relative))
        .collect())
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, PackageError> {
    std::fs::read(path).map_err(|error| PackageError::io_with_path("failed to read file", path, &error))
}

fn read_text(path: &Path) -> Result<String, PackageError> {
    std::fs::read_to_string(path)
        .map_err(|error| PackageError::io_with_path("failed to read file", path, &error))
}

fn write_file(path: &Path, data: &[u8]) -> Result<(), PackageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            PackageError::io_with_path("failed to create directory", parent, &error)
        })?;
    }
    std::fs::write(path, data)
        .map_err(|error| PackageError::io_with_path("failed to write file", path, &error))
}

fn copy_file(source: &Path, destination: &Path) -> Result<(), PackageError> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            PackageError::io_with_path("failed to create directory", parent, &error)
        })?;
    }
    std::fs::copy(source, destination)
        .map(|_| ())
        .map_err(|error| PackageError::io_with_path("failed to copy file", source, &error))
}
