use std::path::Path;

use molt_release::ReleaseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Zip {
        context: &'static str,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("{context}: {details}")]
    Xml {
        context: &'static str,
        details: String,
    },
    #[error("Invalid package {package}: {reason}")]
    InvalidPackage { package: String, reason: String },
    #[error("Checksum failed for {file}: expected {expected}, got {actual}")]
    ChecksumFailed {
        file: String,
        expected: String,
        actual: String,
    },
    #[error("Delta chain must contain only delta releases on top of a full release, found {filename}")]
    MixedReleaseKinds { filename: String },
    #[error(transparent)]
    Release(#[from] ReleaseError),
}

impl PackageError {
    pub(crate) fn io_with_path(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::Io {
            context,
            source: std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        }
    }

    pub(crate) fn zip(context: &'static str, source: zip::result::ZipError) -> Self {
        Self::Zip { context, source }
    }

    pub(crate) fn xml(context: &'static str, details: impl std::fmt::Display) -> Self {
        Self::Xml {
            context,
            details: details.to_string(),
        }
    }

    pub(crate) fn invalid(package: &Path, reason: impl Into<String>) -> Self {
        Self::InvalidPackage {
            package: package.display().to_string(),
            reason: reason.into(),
        }
    }
}
