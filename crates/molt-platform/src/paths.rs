use std::fmt::Display;
use std::path::{Path, PathBuf};

use thiserror::Error;

const PACKAGES_DIR: &str = "packages";
const RELEASES_FILE: &str = "RELEASES";
const VERSION_DIR_PREFIX: &str = "app-";
const PENDING_DELETES_PREFIX: &str = ".molt-pending-deletes-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InstallPathsError {
    #[error("Could not determine local data directory")]
    DataDirUnavailable,
    #[error("Application name must be a single non-empty path component")]
    InvalidAppName,
}

/// On-disk layout of one installed application:
///
/// ```text
/// <root_dir>/<app_name>/packages/RELEASES
/// <root_dir>/<app_name>/packages/*.nupkg
/// <root_dir>/<app_name>/app-<version>/
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPaths {
    pub root_dir: PathBuf,
    pub app_name: String,
    pub app_root: PathBuf,
}

impl InstallPaths {
    pub fn new(root_dir: impl Into<PathBuf>, app_name: &str) -> Result<Self, InstallPathsError> {
        if app_name.is_empty()
            || app_name.contains(['/', '\\'])
            || app_name == "."
            || app_name == ".."
        {
            return Err(InstallPathsError::InvalidAppName);
        }

        let root_dir = root_dir.into();
        Ok(Self {
            app_root: root_dir.join(app_name),
            root_dir,
            app_name: app_name.to_string(),
        })
    }

    /// Build the layout below the platform's per-user local data directory.
    pub fn for_current_user(app_name: &str) -> Result<Self, InstallPathsError> {
        let root = dirs::data_local_dir().ok_or(InstallPathsError::DataDirUnavailable)?;
        Self::new(root, app_name)
    }

    #[must_use]
    pub fn packages_dir(&self) -> PathBuf {
        self.app_root.join(PACKAGES_DIR)
    }

    #[must_use]
    pub fn local_manifest(&self) -> PathBuf {
        self.packages_dir().join(RELEASES_FILE)
    }

    #[must_use]
    pub fn package_file(&self, filename: &str) -> PathBuf {
        self.packages_dir().join(filename)
    }

    #[must_use]
    pub fn version_dir(&self, version: &impl Display) -> PathBuf {
        self.app_root.join(version_dir_name(version))
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.app_root.join("settings.json")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.app_root.join("molt.log")
    }

    /// This app's ledger of deferred deletions. Lives beside the app root so
    /// that it survives the app root itself being scheduled for deletion;
    /// every app sharing `root_dir` gets its own.
    #[must_use]
    pub fn pending_deletes_file(&self) -> PathBuf {
        self.root_dir
            .join(format!("{PENDING_DELETES_PREFIX}{}", self.app_name))
    }

    pub fn version_dirs(&self) -> std::io::Result<Vec<PathBuf>> {
        if !self.app_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.app_root)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() && is_version_dir_name(&entry.file_name().to_string_lossy()) {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.packages_dir())
    }
}

#[must_use]
pub fn version_dir_name(version: &impl Display) -> String {
    format!("{VERSION_DIR_PREFIX}{version}")
}

#[must_use]
pub fn is_version_dir_name(name: &str) -> bool {
    name.len() > VERSION_DIR_PREFIX.len()
        && name[..VERSION_DIR_PREFIX.len()].eq_ignore_ascii_case(VERSION_DIR_PREFIX)
}

/// The version suffix of an `app-<version>` directory, if `path` is one.
#[must_use]
pub fn version_of_dir(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    is_version_dir_name(name).then(|| name[VERSION_DIR_PREFIX.len()..].to_string())
}
