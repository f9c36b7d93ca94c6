use std::path::Path;

use log::{debug, warn};
use molt_platform::fs::write_atomic;

use crate::entry::ReleaseEntry;
use crate::error::ReleaseError;

pub const MANIFEST_FILE_NAME: &str = "RELEASES";

/// How [`parse_manifest_with`] treats a malformed line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseMode {
    /// Any malformed line fails the whole manifest.
    #[default]
    Strict,
    /// Malformed lines are logged and skipped.
    Lenient,
}

/// Parse ledger text, failing on the first malformed line.
pub fn parse_manifest(text: &str) -> Result<Vec<ReleaseEntry>, ReleaseError> {
    parse_manifest_with(text, ParseMode::Strict)
}

pub fn parse_manifest_with(text: &str, mode: ParseMode) -> Result<Vec<ReleaseEntry>, ReleaseError> {
    let mut entries = Vec::new();
    for line in text.split('\n') {
        if line.trim().is_empty() {
            continue;
        }
        match ReleaseEntry::parse(line) {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => {}
            Err(error) if mode == ParseMode::Lenient => {
                warn!("Skipping release manifest line: {error}");
            }
            Err(error) => return Err(error),
        }
    }
    Ok(entries)
}

pub fn serialize_manifest(entries: &[ReleaseEntry]) -> Result<String, ReleaseError> {
    if entries.is_empty() {
        return Err(ReleaseError::EmptyManifest);
    }
    Ok(entries
        .iter()
        .map(ReleaseEntry::entry_as_string)
        .collect::<Vec<_>>()
        .join("\n"))
}

pub fn read_manifest(path: &Path) -> Result<Vec<ReleaseEntry>, ReleaseError> {
    let text = std::fs::read_to_string(path)
        .map_err(|error| ReleaseError::io("failed to read release manifest", path, error))?;
    parse_manifest(&text)
}

/// Replace the ledger at `path` with `entries` without ever exposing a
/// partially written file.
pub fn write_manifest(path: &Path, entries: &[ReleaseEntry]) -> Result<(), ReleaseError> {
    let text = serialize_manifest(entries)?;
    write_atomic(path, text.as_bytes())
        .map_err(|error| ReleaseError::io("failed to write release manifest", path, error))
}

/// Hash every `*.nupkg` in `dir` and replace `dir/RELEASES` with the result.
/// An empty directory produces an empty ledger.
pub fn rebuild_manifest(dir: &Path) -> Result<Vec<ReleaseEntry>, ReleaseError> {
    let listing = std::fs::read_dir(dir)
        .map_err(|error| ReleaseError::io("failed to list release directory", dir, error))?;

    let mut artifacts = Vec::new();
    for item in listing {
        let item =
            item.map_err(|error| ReleaseError::io("failed to list release directory", dir, error))?;
        let path = item.path();
        let is_package = path
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .is_some_and(|ext| ext.eq_ignore_ascii_case("nupkg"));
        if is_package && path.is_file() {
            artifacts.push(path);
        }
    }
    artifacts.sort();

    let entries = artifacts
        .iter()
        .map(|path| ReleaseEntry::generate_from_file(path))
        .collect::<Result<Vec<_>, _>>()?;

    let target = dir.join(MANIFEST_FILE_NAME);
    let text = if entries.is_empty() {
        String::new()
    } else {
        serialize_manifest(&entries)?
    };
    write_atomic(&target, text.as_bytes())
        .map_err(|error| ReleaseError::io("failed to replace release manifest", &target, error))?;

    debug!(
        "Rebuilt {} with {} entries",
        target.display(),
        entries.len()
    );
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{ParseMode, parse_manifest, parse_manifest_with, rebuild_manifest, serialize_manifest};
    use crate::error::ReleaseError;

    const MANIFEST: &str = "\
# released by ci
94689FEDE03FED7AB59C24337673A27837F0C3EC MyApp-1.0.0-full.nupkg 1004502
3A2EADD3C4ECDC8B4DA4C4F6A4E5B9AF5A5D4B7E MyApp-1.1.0-delta.nupkg 3212 # small fix

14DB31D2FC19C7B9B6D7B4A6F04B4C7A7B6C2E11 MyApp-1.1.0-full.nupkg 1015333\r
";

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let entries = parse_manifest(MANIFEST).expect("manifest should parse");

        assert_eq!(entries.len(), 3);
        assert!(entries[1].is_delta());
        assert_eq!(entries[2].filesize(), 1_015_333);
    }

    #[test]
    fn serialize_round_trips_line_set() {
        let entries = parse_manifest(MANIFEST).expect("manifest should parse");
        let text = serialize_manifest(&entries).expect("manifest should serialize");
        let reparsed = parse_manifest(&text).expect("serialized manifest should parse");

        let original: BTreeSet<_> = entries.iter().map(ToString::to_string).collect();
        let round_tripped: BTreeSet<_> = reparsed.iter().map(ToString::to_string).collect();
        assert_eq!(original, round_tripped);
    }

    #[test]
    fn strict_mode_fails_whole_manifest() {
        let text = format!("{MANIFEST}garbage line\n");

        assert!(matches!(
            parse_manifest(&text),
            Err(ReleaseError::MalformedEntry { .. })
        ));
        let lenient = parse_manifest_with(&text, ParseMode::Lenient)
            .expect("lenient parse should not fail");
        assert_eq!(lenient.len(), 3);
    }

    #[test]
    fn serialize_requires_entries() {
        assert!(matches!(
            serialize_manifest(&[]),
            Err(ReleaseError::EmptyManifest)
        ));
    }

    #[test]
    fn rebuild_hashes_packages_and_replaces_ledger() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        std::fs::write(temp.path().join("MyApp-1.0-full.nupkg"), b"full").expect("artifact");
        std::fs::write(temp.path().join("MyApp-1.1-delta.nupkg"), b"delta").expect("artifact");
        std::fs::write(temp.path().join("notes.txt"), b"ignored").expect("other file");
        std::fs::write(temp.path().join("RELEASES"), b"stale").expect("old ledger");

        let entries = rebuild_manifest(temp.path()).expect("rebuild should succeed");

        assert_eq!(entries.len(), 2);
        let written = std::fs::read_to_string(temp.path().join("RELEASES")).expect("ledger");
        let reparsed = parse_manifest(&written).expect("rebuilt ledger should parse");
        assert_eq!(reparsed, entries);
    }

    #[test]
    fn rebuild_of_empty_directory_writes_empty_ledger() {
        let temp = tempfile::tempdir().expect("tempdir should be created");

        let entries = rebuild_manifest(temp.path()).expect("rebuild should succeed");

        assert!(entries.is_empty());
        assert_eq!(
            std::fs::read_to_string(temp.path().join("RELEASES")).expect("ledger"),
            ""
        );
    }
}
