use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("Invalid release entry: {line}")]
    MalformedEntry { line: String },
    #[error("Invalid release entry field {field}: {value}")]
    InvalidEntry { field: &'static str, value: String },
    #[error("Remote release manifest is corrupt: {reason}")]
    CorruptRemoteManifest { reason: String },
    #[error("A release manifest must contain at least one entry")]
    EmptyManifest,
    #[error("There should always be at least one full release")]
    NoFullRelease,
    #[error("An update must apply at least one release")]
    NoReleasesToApply,
    #[error("{context} ({}): {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ReleaseError {
    pub(crate) fn io(context: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn invalid(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidEntry {
            field,
            value: value.into(),
        }
    }
}
