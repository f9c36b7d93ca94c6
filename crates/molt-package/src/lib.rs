#![allow(clippy::missing_errors_doc)]

mod archive;
mod content_types;
mod delta;
mod error;
mod markdown;
mod metadata;
mod packager;
mod profile;
mod releasify;
mod version_range;

pub use archive::{extract_zip, read_entries, zip_directory};
pub use content_types::{CONTENT_TYPES_FILE, ensure_delta_content_types, merge_content_types};
pub use delta::{REMOVED_LIST, apply_delta, build_delta, fold_delta_chain, full_release_name};
pub use error::PackageError;
pub use markdown::render_markdown;
pub use metadata::{
    FetchReleaseNotes, PackageDependency, PackageMetadata, find_nuspec, remove_dependencies,
    rewrite_release_notes,
};
pub use packager::ReleasePackager;
pub use profile::{FrameworkProfile, install_package_files};
pub use releasify::{ReleasifyOutput, releasify};
pub use version_range::{VersionRange, VersionRangeError, parse_package_version};
