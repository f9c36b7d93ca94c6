#![allow(clippy::missing_errors_doc)]

mod digest;
mod entry;
mod error;
mod manifest;
mod resolver;
mod version;

pub use digest::{digests_match, sha1_bytes, sha1_file, sha1_reader};
pub use entry::{DELTA_SUFFIX, FULL_SUFFIX, ReleaseEntry, is_delta_filename};
pub use error::ReleaseError;
pub use manifest::{
    MANIFEST_FILE_NAME, ParseMode, parse_manifest, parse_manifest_with, read_manifest,
    rebuild_manifest, serialize_manifest, write_manifest,
};
pub use resolver::{UpdateInfo, find_current_release, resolve, resolve_from_text};
pub use version::{ReleaseVersion, VersionParseError};
