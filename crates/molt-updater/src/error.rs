use std::path::{Path, PathBuf};

use molt_package::PackageError;
use molt_platform::{InstallPathsError, LockError, PlatformError};
use molt_release::ReleaseError;
use thiserror::Error;

use crate::hooks::HookError;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Request to {url} failed with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("Checksum failed for {file}: expected {expected}, got {actual}")]
    ChecksumFailed {
        file: String,
        expected: String,
        actual: String,
    },
    #[error("Another process is updating {}", root.display())]
    UpdateInProgress { root: PathBuf },
    #[error("Update lock failed: {0}")]
    Lock(#[source] LockError),
    #[error("The supplied update lock does not guard {}", root.display())]
    LockNotHeld { root: PathBuf },
    #[error("Hook {} failed: {source}", module.display())]
    Hook {
        module: PathBuf,
        #[source]
        source: HookError,
    },
    #[error("Operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Release(#[from] ReleaseError),
    #[error(transparent)]
    Package(#[from] PackageError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Paths(#[from] InstallPathsError),
    #[error("{context}: {source}")]
    Task {
        context: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
    #[error("{0}")]
    Invalid(String),
}

impl UpdateError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn http(context: &'static str, source: reqwest::Error) -> Self {
        Self::Http { context, source }
    }

    pub(crate) fn io_with_path(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::io(
            context,
            std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        )
    }

    pub(crate) fn task(context: &'static str, source: tokio::task::JoinError) -> Self {
        Self::Task { context, source }
    }

    /// Whether repeating the same request could succeed: network failures,
    /// server-side statuses, throttling, and local I/O hiccups. Client
    /// errors and artifacts that fail verification are final.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Http { source, .. } => !(source.is_builder() || source.is_redirect()),
            Self::Status { status, .. } => {
                status.is_server_error()
                    || *status == reqwest::StatusCode::REQUEST_TIMEOUT
                    || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }

    /// Whether the error means another process holds the update lock.
    #[must_use]
    pub fn is_update_in_progress(&self) -> bool {
        matches!(self, Self::UpdateInProgress { .. })
    }
}

impl From<LockError> for UpdateError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::UpdateInProgress { root, .. } => Self::UpdateInProgress { root },
            other => Self::Lock(other),
        }
    }
}
