use std::fmt;
use std::path::{Component, Path, PathBuf};

use log::{debug, warn};

use crate::error::PackageError;

/// Target runtime variant whose `lib/` files are installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameworkProfile {
    #[default]
    Net40,
    Net45,
}

impl FrameworkProfile {
    /// `Net45` when any `lib/` folder names a 4.5 profile.
    #[must_use]
    pub fn detect<'a>(archive_paths: impl IntoIterator<Item = &'a str>) -> Self {
        let has_net45 = archive_paths.into_iter().any(|path| {
            let mut parts = path.split(['/', '\\']);
            parts.next().is_some_and(|lib| lib.eq_ignore_ascii_case("lib"))
                && parts.next().is_some_and(|profile| {
                    profile
                        .get(..5)
                        .is_some_and(|head| head.eq_ignore_ascii_case("net45"))
                })
        });

        if has_net45 { Self::Net45 } else { Self::Net40 }
    }

    /// Whether the archive entry at `path` belongs in an installation for
    /// this profile.
    #[must_use]
    pub fn includes(self, path: &str) -> bool {
        let normalized = path.replace('\\', "/");
        if !starts_with_ignore_case(&normalized, "lib/") {
            return false;
        }
        if starts_with_ignore_case(&normalized, "lib/winrt45") {
            return false;
        }
        if self == Self::Net40 && starts_with_ignore_case(&normalized, "lib/net45") {
            return false;
        }
        true
    }

    /// Where an included entry lands inside the version directory: the path
    /// below its profile folder, or below `lib/` for files at that level.
    #[must_use]
    pub fn install_path(path: &str) -> Option<String> {
        let normalized = path.replace('\\', "/");
        let mut parts = normalized.split('/').filter(|part| !part.is_empty());
        if !parts.next()?.eq_ignore_ascii_case("lib") {
            return None;
        }
        let rest: Vec<&str> = parts.collect();
        match rest.as_slice() {
            [] => None,
            [file] => Some((*file).to_string()),
            [_profile, below @ ..] => Some(below.join("/")),
        }
    }
}

/// Copy the entries of `package` that belong to `profile` into `dest`,
/// replacing `dest` if it already exists. Entries are written in path order,
/// so when several profile folders provide the same file the lexically-last
/// one wins. With no explicit profile it is detected from the package.
pub fn install_package_files(
    package: &Path,
    dest: &Path,
    profile: Option<FrameworkProfile>,
) -> Result<Vec<PathBuf>, PackageError> {
    let file = std::fs::File::open(package).map_err(|error| {
        PackageError::io_with_path("failed to open package", package, &error)
    })?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|error| PackageError::zip("failed to read package archive", error))?;

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .map(str::to_string)
        .collect();
    names.sort();
    let profile = profile.unwrap_or_else(|| FrameworkProfile::detect(names.iter().map(String::as_str)));

    if dest.exists() {
        std::fs::remove_dir_all(dest).map_err(|error| {
            PackageError::io_with_path("failed to replace version directory", dest, &error)
        })?;
    }
    std::fs::create_dir_all(dest).map_err(|error| {
        PackageError::io_with_path("failed to create version directory", dest, &error)
    })?;

    let mut installed = Vec::new();
    for name in names.iter().filter(|name| profile.includes(name)) {
        let Some(relative) = FrameworkProfile::install_path(name) else {
            continue;
        };
        let relative = PathBuf::from(relative);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            warn!("Skipping package entry with unsafe path: {name}");
            continue;
        }

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                PackageError::io_with_path("failed to create install directory", parent, &error)
            })?;
        }
        let mut entry = archive
            .by_name(name)
            .map_err(|error| PackageError::zip("failed to read package entry", error))?;
        let mut output = std::fs::File::create(&target).map_err(|error| {
            PackageError::io_with_path("failed to create installed file", &target, &error)
        })?;
        std::io::copy(&mut entry, &mut output).map_err(|error| {
            PackageError::io_with_path("failed to write installed file", &target, &error)
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode));
            }
        }

        debug!("Writing {} to app directory", target.display());
        if !installed.contains(&relative) {
            installed.push(relative);
        }
    }

    Ok(installed)
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len()
        && value
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

impl fmt::Display for FrameworkProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Net40 => write!(f, "net40"),
            Self::Net45 => write!(f, "net45"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FrameworkProfile;

    #[test]
    fn detects_net45_from_lib_folders() {
        assert_eq!(
            FrameworkProfile::detect(["MyApp.nuspec", "lib/net40/a.dll", "lib/NET45/a.dll"]),
            FrameworkProfile::Net45
        );
        assert_eq!(
            FrameworkProfile::detect(["lib/net40/a.dll", "content/net45.txt"]),
            FrameworkProfile::Net40
        );
    }

    #[test]
    fn net40_excludes_net45_and_winrt() {
        let profile = FrameworkProfile::Net40;
        assert!(profile.includes("lib/net40/a.dll"));
        assert!(profile.includes("lib/net20/a.dll"));
        assert!(!profile.includes("lib/net45/a.dll"));
        assert!(!profile.includes("lib/winrt45/a.dll"));
        assert!(!profile.includes("content/readme.txt"));
    }

    #[test]
    fn net45_includes_net45_but_never_winrt() {
        let profile = FrameworkProfile::Net45;
        assert!(profile.includes("lib/net45/a.dll"));
        assert!(profile.includes("lib\\net40\\a.dll"));
        assert!(!profile.includes("lib/winrt45/a.dll"));
    }

    #[test]
    fn install_path_strips_profile_folder() {
        assert_eq!(
            FrameworkProfile::install_path("lib/net45/a.dll").as_deref(),
            Some("a.dll")
        );
        assert_eq!(
            FrameworkProfile::install_path("lib/net45/x86/native.dll").as_deref(),
            Some("x86/native.dll")
        );
        assert_eq!(FrameworkProfile::install_path("lib/top.dll").as_deref(), Some("top.dll"));
        assert_eq!(FrameworkProfile::install_path("tools/a.exe"), None);
    }

    #[test]
    fn install_copies_profile_files_and_last_profile_wins() {
        use std::io::Write;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let package = temp.path().join("MyApp-1.0.0-full.nupkg");
        let file = std::fs::File::create(&package).expect("package should be created");
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in [
            ("MyApp.nuspec", "<package/>"),
            ("lib/net40/MyApp.exe", "net40"),
            ("lib/net45/MyApp.exe", "net45"),
            ("lib/net45/x86/native.dll", "native"),
            ("lib/winrt45/MyApp.exe", "winrt"),
        ] {
            writer.start_file(name, options).expect("entry should start");
            writer.write_all(data.as_bytes()).expect("entry should be written");
        }
        writer.finish().expect("package should be finalized");

        let dest = temp.path().join("app-1.0.0");
        std::fs::create_dir_all(&dest).expect("stale dir should be created");
        std::fs::write(dest.join("stale.txt"), b"old").expect("stale file should be written");

        let installed = super::install_package_files(&package, &dest, None)
            .expect("install should succeed");

        assert_eq!(
            std::fs::read_to_string(dest.join("MyApp.exe")).expect("exe should exist"),
            "net45"
        );
        assert!(dest.join("x86/native.dll").exists());
        assert!(!dest.join("stale.txt").exists());
        assert_eq!(installed.len(), 2);

        super::install_package_files(&package, &dest, Some(FrameworkProfile::Net40))
            .expect("net40 install should succeed");
        assert_eq!(
            std::fs::read_to_string(dest.join("MyApp.exe")).expect("exe should exist"),
            "net40"
        );
    }
}
