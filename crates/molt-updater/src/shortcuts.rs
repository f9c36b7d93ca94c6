use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use molt_platform::InstallPaths;
use molt_platform::fs::write_atomic;
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

const LINK_EXTENSION: &str = "lnk";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortcutLocation {
    #[default]
    Desktop,
    StartMenu,
    Custom,
}

/// A shortcut a hook wants to exist. Two requests are the same shortcut
/// when title and location match; the target may move between versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortcutRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub target: PathBuf,
    #[serde(default)]
    pub arguments: Option<String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub icon_path: Option<PathBuf>,
    #[serde(default)]
    pub icon_index: i32,
    #[serde(default)]
    pub location: ShortcutLocation,
    #[serde(default)]
    pub custom_location: Option<PathBuf>,
}

impl PartialEq for ShortcutRequest {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title
            && self.location == other.location
            && self.custom_location == other.custom_location
    }
}

impl Eq for ShortcutRequest {}

impl Hash for ShortcutRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.title.hash(state);
        self.location.hash(state);
        self.custom_location.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedShortcut {
    pub path: PathBuf,
    pub target: PathBuf,
    pub working_directory: Option<PathBuf>,
}

/// Creates and repairs the shortcuts an installation owns.
pub trait ShortcutStore: Send + Sync {
    fn link_path(&self, request: &ShortcutRequest) -> Option<PathBuf>;

    fn exists(&self, request: &ShortcutRequest) -> bool {
        self.link_path(request).is_some_and(|path| path.exists())
    }

    fn create(&self, request: &ShortcutRequest) -> Result<PathBuf, UpdateError>;

    fn remove(&self, request: &ShortcutRequest) -> Result<(), UpdateError>;

    fn pinned(&self) -> Result<Vec<PinnedShortcut>, UpdateError>;

    fn retarget(
        &self,
        shortcut: &PinnedShortcut,
        target: &Path,
        working_directory: Option<&Path>,
    ) -> Result<(), UpdateError>;

    fn unpin(&self, shortcut: &PinnedShortcut) -> Result<(), UpdateError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkFile {
    target: PathBuf,
    #[serde(default)]
    arguments: Option<String>,
    #[serde(default)]
    working_directory: Option<PathBuf>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    icon_path: Option<PathBuf>,
    #[serde(default)]
    icon_index: i32,
}

/// [`ShortcutStore`] that keeps each shortcut as a small JSON `.lnk` file
/// below configurable desktop, start-menu, and pinned directories.
#[derive(Debug, Clone)]
pub struct FileShortcutStore {
    app_name: String,
    desktop_dir: PathBuf,
    start_menu_dir: PathBuf,
    pinned_dir: PathBuf,
}

impl FileShortcutStore {
    #[must_use]
    pub fn new(
        app_name: impl Into<String>,
        desktop_dir: impl Into<PathBuf>,
        start_menu_dir: impl Into<PathBuf>,
        pinned_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            desktop_dir: desktop_dir.into(),
            start_menu_dir: start_menu_dir.into(),
            pinned_dir: pinned_dir.into(),
        }
    }

    /// The current user's desktop, start menu, and taskbar-pin folders,
    /// falling back to folders inside the app root where the platform has
    /// none.
    #[must_use]
    pub fn for_current_user(paths: &InstallPaths) -> Self {
        let fallback = paths.app_root.join("shortcuts");
        let desktop = dirs::desktop_dir().unwrap_or_else(|| fallback.join("desktop"));

        #[cfg(windows)]
        let (start_menu, pinned) = match dirs::data_dir() {
            Some(roaming) => {
                let windows = roaming.join("Microsoft");
                (
                    windows.join("Windows").join("Start Menu").join("Programs"),
                    windows
                        .join("Internet Explorer")
                        .join("Quick Launch")
                        .join("User Pinned")
                        .join("TaskBar"),
                )
            }
            None => (fallback.join("start-menu"), fallback.join("pinned")),
        };

        #[cfg(not(windows))]
        let (start_menu, pinned) = (
            dirs::data_dir().map_or_else(|| fallback.join("start-menu"), |data| data.join("applications")),
            fallback.join("pinned"),
        );

        Self::new(paths.app_name.clone(), desktop, start_menu, pinned)
    }

    #[must_use]
    pub fn pinned_dir(&self) -> &Path {
        &self.pinned_dir
    }

    fn read_link(path: &Path) -> Result<LinkFile, UpdateError> {
        let content = std::fs::read_to_string(path)
            .map_err(|error| UpdateError::io_with_path("failed to read shortcut", path, &error))?;
        serde_json::from_str(&content)
            .map_err(|error| UpdateError::Invalid(format!("corrupt shortcut {}: {error}", path.display())))
    }

    fn write_link(path: &Path, link: &LinkFile) -> Result<(), UpdateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                UpdateError::io_with_path("failed to create shortcut directory", parent, &error)
            })?;
        }
        let content = serde_json::to_vec_pretty(link)
            .map_err(|error| UpdateError::Invalid(format!("unserializable shortcut: {error}")))?;
        write_atomic(path, &content)
            .map_err(|error| UpdateError::io_with_path("failed to write shortcut", path, &error))
    }
}

impl ShortcutStore for FileShortcutStore {
    fn link_path(&self, request: &ShortcutRequest) -> Option<PathBuf> {
        let file_name = format!("{}.{LINK_EXTENSION}", sanitize_title(&request.title));
        match request.location {
            ShortcutLocation::Desktop => Some(self.desktop_dir.join(file_name)),
            ShortcutLocation::StartMenu => Some(
                self.start_menu_dir
                    .join(sanitize_title(&self.app_name))
                    .join(file_name),
            ),
            ShortcutLocation::Custom => request
                .custom_location
                .as_ref()
                .map(|dir| dir.join(file_name)),
        }
    }

    fn create(&self, request: &ShortcutRequest) -> Result<PathBuf, UpdateError> {
        let Some(path) = self.link_path(request) else {
            return Err(UpdateError::Invalid(format!(
                "shortcut {} has a custom location but no directory",
                request.title
            )));
        };

        let link = LinkFile {
            target: request.target.clone(),
            arguments: request.arguments.clone(),
            working_directory: request.working_directory.clone(),
            description: request.description.clone(),
            icon_path: request.icon_path.clone(),
            icon_index: request.icon_index,
        };
        Self::write_link(&path, &link)?;
        info!("Created shortcut {}", path.display());
        Ok(path)
    }

    fn remove(&self, request: &ShortcutRequest) -> Result<(), UpdateError> {
        let Some(path) = self.link_path(request) else {
            return Ok(());
        };
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed shortcut {}", path.display());
                Ok(())
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(UpdateError::io_with_path(
                "failed to remove shortcut",
                &path,
                &error,
            )),
        }
    }

    fn pinned(&self) -> Result<Vec<PinnedShortcut>, UpdateError> {
        let entries = match std::fs::read_dir(&self.pinned_dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(UpdateError::io_with_path(
                    "failed to list pinned shortcuts",
                    &self.pinned_dir,
                    &error,
                ));
            }
        };

        let mut pinned = Vec::new();
        for path in entries.flatten().map(|entry| entry.path()) {
            let is_link = path
                .extension()
                .and_then(std::ffi::OsStr::to_str)
                .is_some_and(|ext| ext.eq_ignore_ascii_case(LINK_EXTENSION));
            if !is_link {
                continue;
            }
            match Self::read_link(&path) {
                Ok(link) => pinned.push(PinnedShortcut {
                    path,
                    target: link.target,
                    working_directory: link.working_directory,
                }),
                Err(error) => warn!("Skipping unreadable pinned shortcut: {error}"),
            }
        }
        pinned.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(pinned)
    }

    fn retarget(
        &self,
        shortcut: &PinnedShortcut,
        target: &Path,
        working_directory: Option<&Path>,
    ) -> Result<(), UpdateError> {
        let mut link = Self::read_link(&shortcut.path)?;
        link.target = target.to_path_buf();
        link.working_directory = working_directory.map(Path::to_path_buf);
        Self::write_link(&shortcut.path, &link)?;
        debug!(
            "Retargeted {} to {}",
            shortcut.path.display(),
            target.display()
        );
        Ok(())
    }

    fn unpin(&self, shortcut: &PinnedShortcut) -> Result<(), UpdateError> {
        match std::fs::remove_file(&shortcut.path) {
            Ok(()) => {
                info!("Unpinned {}", shortcut.path.display());
                Ok(())
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(UpdateError::io_with_path(
                "failed to unpin shortcut",
                &shortcut.path,
                &error,
            )),
        }
    }
}

fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
