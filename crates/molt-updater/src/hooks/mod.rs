mod process;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use molt_platform::executables_in;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shortcuts::ShortcutRequest;

pub use process::{HOOK_ARGUMENT, ProcessHookRunner};

/// Suffix of the marker file that declares `<module>` hook-aware.
pub const HOOK_MARKER_SUFFIX: &str = ".molt-hooks";

/// One lifecycle callback sent to an application's hook module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "hook", rename_all = "snake_case")]
pub enum HookRequest {
    AppInstall { version: String },
    AppUninstall { version: String },
    VersionInstalled { version: String },
    VersionUninstalling { version: String },
    ShortcutList,
}

impl HookRequest {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AppInstall { .. } => "app_install",
            Self::AppUninstall { .. } => "app_uninstall",
            Self::VersionInstalled { .. } => "version_installed",
            Self::VersionUninstalling { .. } => "version_uninstalling",
            Self::ShortcutList => "shortcut_list",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookResponse {
    #[serde(default)]
    pub shortcuts: Vec<ShortcutRequest>,
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("failed to start hook: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("hook I/O failed: {0}")]
    Io(#[source] std::io::Error),
    #[error("hook did not finish within {secs} seconds")]
    Timeout { secs: u64 },
    #[error("hook exited with {}: {stderr}", code.map_or_else(|| "a signal".to_string(), |code| format!("code {code}")))]
    Exit { code: Option<i32>, stderr: String },
    #[error("hook returned an invalid response: {0}")]
    Protocol(#[source] serde_json::Error),
}

/// Runs one hook module outside the updater's own process.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run(&self, module: &Path, request: &HookRequest) -> Result<HookResponse, HookError>;
}

/// Finds the hook modules shipped in a version directory.
pub trait HookDiscovery: Send + Sync {
    fn discover(&self, dir: &Path) -> Vec<PathBuf>;
}

/// Executables in the directory that have a sibling `<file>.molt-hooks`
/// marker. An unreadable directory yields no modules.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerDiscovery;

impl HookDiscovery for MarkerDiscovery {
    fn discover(&self, dir: &Path) -> Vec<PathBuf> {
        executables_in(dir)
            .into_iter()
            .filter(|module| {
                let mut marker = module.as_os_str().to_os_string();
                marker.push(HOOK_MARKER_SUFFIX);
                Path::new(&marker).is_file()
            })
            .collect()
    }
}
