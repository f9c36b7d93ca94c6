#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use molt_package::{ReleasePackager, ReleasifyOutput, releasify};
use molt_platform::InstallPaths;
use molt_updater::hooks::{HookDiscovery, HookError, HookRequest, HookResponse, HookRunner};
use molt_updater::{
    Downloader, FileShortcutStore, ManagerOptions, ShortcutLocation, ShortcutRequest,
    UpdateError, UpdateManager, UpdateSource, UpdaterSettings,
};
use tokio_util::sync::CancellationToken;

pub const APP: &str = "MyApp";

/// Hook runner and discovery in one: a version directory is hook-aware when
/// it ships a `hook` file, and every call is recorded.
#[derive(Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<(String, HookRequest)>>,
    fail_on: Mutex<Option<&'static str>>,
}

impl RecordingHooks {
    pub fn fail_on(&self, hook: Option<&'static str>) {
        *self.fail_on.lock().expect("hook state should lock") = hook;
    }

    pub fn clear(&self) {
        self.calls.lock().expect("hook state should lock").clear();
    }

    /// Names of the hooks run from `dir_name`, in call order.
    pub fn requests_in(&self, dir_name: &str) -> Vec<&'static str> {
        self.calls
            .lock()
            .expect("hook state should lock")
            .iter()
            .filter(|(dir, _)| dir == dir_name)
            .map(|(_, request)| request.name())
            .collect()
    }
}

#[async_trait]
impl HookRunner for RecordingHooks {
    async fn run(&self, module: &Path, request: &HookRequest) -> Result<HookResponse, HookError> {
        let dir = module.parent().expect("hook module should live in a directory");
        let dir_name = dir
            .file_name()
            .expect("version directory should have a name")
            .to_string_lossy()
            .to_string();
        self.calls
            .lock()
            .expect("hook state should lock")
            .push((dir_name, request.clone()));

        if *self.fail_on.lock().expect("hook state should lock") == Some(request.name()) {
            return Err(HookError::Exit {
                code: Some(1),
                stderr: "boom".to_string(),
            });
        }

        Ok(match request {
            HookRequest::ShortcutList => HookResponse {
                shortcuts: vec![shortcut("MyApp", dir.join("MyApp.exe"))],
            },
            _ => HookResponse::default(),
        })
    }
}

impl HookDiscovery for RecordingHooks {
    fn discover(&self, dir: &Path) -> Vec<PathBuf> {
        let module = dir.join("hook");
        if module.is_file() { vec![module] } else { Vec::new() }
    }
}

/// Serves `https://releases.test/app/<file>` from a local directory.
pub struct DirectoryDownloader {
    root: PathBuf,
    downloads: AtomicUsize,
}

pub const RELEASES_URL: &str = "https://releases.test/app";

impl DirectoryDownloader {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            downloads: AtomicUsize::new(0),
        }
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn local(&self, url: &str) -> Result<PathBuf, UpdateError> {
        url.strip_prefix(RELEASES_URL)
            .map(|name| self.root.join(name.trim_start_matches('/')))
            .ok_or_else(|| UpdateError::Invalid(format!("unknown url {url}")))
    }
}

#[async_trait]
impl Downloader for DirectoryDownloader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        let path = self.local(url)?;
        std::fs::read(&path).map_err(|error| UpdateError::Invalid(format!("{url}: {error}")))
    }

    /// Writes the artifact in quarters, reporting after each one.
    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
        on_bytes: &(dyn Fn(u64) + Send + Sync),
    ) -> Result<u64, UpdateError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let path = self.local(url)?;
        let data =
            std::fs::read(&path).map_err(|error| UpdateError::Invalid(format!("{url}: {error}")))?;
        let mut file = std::fs::File::create(dest)
            .map_err(|error| UpdateError::Invalid(format!("{url}: {error}")))?;
        let mut written = 0_u64;
        for chunk in data.chunks(data.len().div_ceil(4).max(1)) {
            file.write_all(chunk)
                .map_err(|error| UpdateError::Invalid(format!("{url}: {error}")))?;
            written += chunk.len() as u64;
            on_bytes(written);
        }
        Ok(written)
    }
}

pub struct Fixture {
    pub temp: tempfile::TempDir,
    pub paths: InstallPaths,
    pub releases: PathBuf,
    pub hooks: Arc<RecordingHooks>,
    pub shortcuts: Arc<FileShortcutStore>,
    pub downloader: Arc<DirectoryDownloader>,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let paths =
            InstallPaths::new(temp.path().join("apps"), APP).expect("app name should be valid");
        let releases = temp.path().join("releases");
        let shortcuts = Arc::new(FileShortcutStore::new(
            APP,
            temp.path().join("desktop"),
            temp.path().join("start-menu"),
            temp.path().join("pinned"),
        ));
        let downloader = Arc::new(DirectoryDownloader::new(&releases));

        Self {
            temp,
            paths,
            releases,
            hooks: Arc::new(RecordingHooks::default()),
            shortcuts,
            downloader,
        }
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.temp.path().join("locks")
    }

    pub fn desktop_link(&self) -> PathBuf {
        self.temp.path().join("desktop").join("MyApp.lnk")
    }

    pub fn pinned_dir(&self) -> PathBuf {
        self.temp.path().join("pinned")
    }

    pub fn publish(&self, version: &str) -> ReleasifyOutput {
        self.publish_to(&self.releases, version)
    }

    /// Build `MyApp` `version` and publish it into `releases_dir`, adding a
    /// delta against the previous release there.
    pub fn publish_to(&self, releases_dir: &Path, version: &str) -> ReleasifyOutput {
        let input = self
            .temp
            .path()
            .join("scratch")
            .join(format!("{APP}.{version}.nupkg"));
        write_developer_package(&input, version);

        let packager = ReleasePackager::new(&input).with_machine_cache(None);
        releasify(&packager, releases_dir, None).expect("release should be published")
    }

    pub fn settings(&self) -> UpdaterSettings {
        UpdaterSettings {
            lock_timeout_ms: 200,
            retry_delays_secs: vec![0],
            delete_retries: 0,
            delete_retry_delay_ms: 0,
            ..UpdaterSettings::default()
        }
    }

    pub fn options(&self) -> ManagerOptions {
        ManagerOptions {
            settings: self.settings(),
            profile: None,
            lock_dir: self.lock_dir(),
            downloader: self.downloader.clone(),
            hook_runner: self.hooks.clone(),
            hook_discovery: self.hooks.clone(),
            shortcuts: self.shortcuts.clone(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn manager(&self) -> UpdateManager {
        self.manager_with(
            UpdateSource::Directory(self.releases.clone()),
            self.options(),
        )
    }

    pub fn manager_with(&self, source: UpdateSource, options: ManagerOptions) -> UpdateManager {
        UpdateManager::new(source, self.paths.clone(), options)
    }
}

pub fn shortcut(title: &str, target: PathBuf) -> ShortcutRequest {
    ShortcutRequest {
        title: title.to_string(),
        description: None,
        target,
        arguments: None,
        working_directory: None,
        icon_path: None,
        icon_index: 0,
        location: ShortcutLocation::Desktop,
        custom_location: None,
    }
}

pub fn exe_contents(version: &str) -> Vec<u8> {
    format!("#!/bin/sh\necho {APP} {version}\n").into_bytes()
}

/// Incompressible, so a full package always outweighs a delta.
pub fn shared_payload() -> Vec<u8> {
    let mut state: u32 = 0x2545_F491;
    (0..64 * 1024)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16).to_le_bytes()[0]
        })
        .collect()
}

fn write_developer_package(path: &Path, version: &str) {
    std::fs::create_dir_all(path.parent().expect("package should have a parent"))
        .expect("scratch directory should be created");
    let nuspec = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://schemas.microsoft.com/packaging/2010/07/nuspec.xsd">
  <metadata>
    <id>{APP}</id>
    <version>{version}</version>
    <title>{APP}</title>
    <releaseNotes>Release {version}</releaseNotes>
  </metadata>
</package>
"#
    );

    let file = std::fs::File::create(path).expect("package file should be created");
    let mut writer = zip::ZipWriter::new(file);
    let plain = zip::write::SimpleFileOptions::default();
    let executable = plain.unix_permissions(0o755);

    let entries: [(&str, Vec<u8>, zip::write::SimpleFileOptions); 4] = [
        ("MyApp.nuspec", nuspec.into_bytes(), plain),
        ("lib/net45/MyApp.exe", exe_contents(version), executable),
        ("lib/net45/Shared.dll", shared_payload(), plain),
        ("lib/net45/hook", b"hook".to_vec(), plain),
    ];
    for (name, data, options) in entries {
        writer.start_file(name, options).expect("entry should start");
        writer.write_all(&data).expect("entry should be written");
    }
    writer.finish().expect("package should be finalized");
}

pub fn drain(receiver: &mut tokio::sync::mpsc::UnboundedReceiver<u8>) -> Vec<u8> {
    let mut values = Vec::new();
    while let Ok(value) = receiver.try_recv() {
        values.push(value);
    }
    values
}
