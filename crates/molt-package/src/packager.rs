use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use molt_platform::fs::{copy_dir_recursive, files_recursively};
use molt_release::{DELTA_SUFFIX, FULL_SUFFIX};

use crate::archive::{extract_zip, zip_directory};
use crate::content_types::ensure_delta_content_types;
use crate::error::PackageError;
use crate::metadata::{
    PackageMetadata, find_nuspec, has_extension, remove_dependencies, rewrite_release_notes,
};
use crate::version_range::{VersionRange, parse_package_version};

/// `lib/` profile folders that never apply to a desktop install.
const BANNED_PROFILES: [&str; 3] = ["sl", "winrt", "netcore"];

/// Turns a developer package into a release package: dependencies
/// flattened into `lib/`, foreign profiles and documentation sidecars
/// dropped, and the manifest stripped of its dependency list.
#[derive(Debug, Clone)]
pub struct ReleasePackager {
    input: PathBuf,
    dependency_root: Option<PathBuf>,
    machine_cache: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct CandidatePackage {
    path: PathBuf,
    metadata: PackageMetadata,
}

impl ReleasePackager {
    #[must_use]
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            dependency_root: None,
            machine_cache: default_machine_cache(),
        }
    }

    #[must_use]
    pub fn with_dependency_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dependency_root = Some(dir.into());
        self
    }

    /// Override the machine-wide package cache consulted when a dependency
    /// is not found below the dependency root. `None` disables it.
    #[must_use]
    pub fn with_machine_cache(mut self, dir: Option<PathBuf>) -> Self {
        self.machine_cache = dir;
        self
    }

    #[must_use]
    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn metadata(&self) -> Result<PackageMetadata, PackageError> {
        PackageMetadata::from_archive(&self.input)
    }

    pub fn suggested_release_file_name(&self) -> Result<String, PackageError> {
        let metadata = self.metadata()?;
        Ok(format!("{}-{}{FULL_SUFFIX}", metadata.id, metadata.version))
    }

    pub fn suggested_delta_file_name(&self) -> Result<String, PackageError> {
        let metadata = self.metadata()?;
        Ok(format!("{}-{}{DELTA_SUFFIX}", metadata.id, metadata.version))
    }

    /// Write the release package to `output`. When `notes_transform` is
    /// given, the manifest's release notes are replaced with its result.
    pub fn build_release_package(
        &self,
        output: &Path,
        notes_transform: Option<&dyn Fn(&str) -> String>,
    ) -> Result<PathBuf, PackageError> {
        let metadata = self.metadata()?;
        info!(
            "Creating release package {} {} from {}",
            metadata.id,
            metadata.version,
            self.input.display()
        );

        let dependencies = self.resolve_dependencies(&metadata)?;
        let scratch = tempfile::tempdir().map_err(|source| PackageError::Io {
            context: "failed to create scratch directory",
            source,
        })?;
        let work_dir = scratch.path().join("package");
        extract_zip(&self.input, &work_dir)?;

        for dependency in &dependencies {
            merge_dependency_lib(dependency, scratch.path(), &work_dir)?;
        }

        let nuspec = find_nuspec(&work_dir)?;
        let xml = std::fs::read_to_string(&nuspec).map_err(|error| {
            PackageError::io_with_path("failed to read package manifest", &nuspec, &error)
        })?;
        let mut xml = remove_dependencies(&xml)?;
        if let Some(transform) = notes_transform {
            xml = rewrite_release_notes(&xml, transform)?;
        }
        std::fs::write(&nuspec, xml.as_bytes()).map_err(|error| {
            PackageError::io_with_path("failed to write package manifest", &nuspec, &error)
        })?;

        remove_banned_profiles(&work_dir)?;
        remove_developer_documentation(&work_dir)?;
        ensure_delta_content_types(&work_dir)?;

        zip_directory(&work_dir, output)?;
        info!("Wrote release package {}", output.display());
        Ok(output.to_path_buf())
    }

    fn resolve_dependencies(
        &self,
        metadata: &PackageMetadata,
    ) -> Result<Vec<CandidatePackage>, PackageError> {
        let local = match &self.dependency_root {
            Some(root) => scan_packages(root)?,
            None => Vec::new(),
        };
        let cache = match &self.machine_cache {
            Some(root) if root.is_dir() => scan_packages(root)?,
            _ => Vec::new(),
        };

        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        self.collect_dependencies(metadata, &local, &cache, &mut seen, &mut resolved);
        debug!("Resolved {} dependencies of {}", resolved.len(), metadata.id);
        Ok(resolved)
    }

    fn collect_dependencies(
        &self,
        metadata: &PackageMetadata,
        local: &[CandidatePackage],
        cache: &[CandidatePackage],
        seen: &mut HashSet<(String, String)>,
        resolved: &mut Vec<CandidatePackage>,
    ) {
        for dependency in &metadata.dependencies {
            let range = match dependency.version_range.as_deref() {
                Some(spec) => spec.parse::<VersionRange>().unwrap_or_else(|error| {
                    warn!("{error} for dependency {}; accepting any version", dependency.id);
                    VersionRange::any()
                }),
                None => VersionRange::any(),
            };

            let Some(found) = find_package(&dependency.id, &range, local)
                .or_else(|| find_package(&dependency.id, &range, cache))
            else {
                warn!(
                    "Couldn't find file for package in {}: {}",
                    self.dependency_root
                        .as_deref()
                        .map_or_else(|| "<none>".to_string(), |dir| dir.display().to_string()),
                    dependency.id
                );
                continue;
            };

            let key = (
                found.metadata.id.to_ascii_lowercase(),
                found.metadata.version.clone(),
            );
            if !seen.insert(key) {
                continue;
            }

            resolved.push(found.clone());
            self.collect_dependencies(&found.metadata, local, cache, seen, resolved);
        }
    }
}

fn merge_dependency_lib(
    dependency: &CandidatePackage,
    scratch: &Path,
    work_dir: &Path,
) -> Result<(), PackageError> {
    info!(
        "Scanning {} {}",
        dependency.metadata.id, dependency.metadata.version
    );
    let extracted = scratch.join(format!(
        "dep-{}-{}",
        dependency.metadata.id, dependency.metadata.version
    ));
    extract_zip(&dependency.path, &extracted)?;

    let Some(lib) = child_dir_named(&extracted, "lib")? else {
        debug!("{} has no lib folder", dependency.metadata.id);
        return Ok(());
    };
    let target = child_dir_named(work_dir, "lib")?.unwrap_or_else(|| work_dir.join("lib"));
    copy_dir_recursive(&lib, &target).map_err(|error| {
        PackageError::io_with_path("failed to merge dependency files", &lib, &error)
    })
}

fn default_machine_cache() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".nuget").join("packages"))
}

fn find_package<'a>(
    id: &str,
    range: &VersionRange,
    candidates: &'a [CandidatePackage],
) -> Option<&'a CandidatePackage> {
    candidates
        .iter()
        .filter(|candidate| candidate.metadata.id.eq_ignore_ascii_case(id))
        .filter(|candidate| range.matches_str(&candidate.metadata.version))
        .max_by(|a, b| {
            parse_package_version(&a.metadata.version).cmp(&parse_package_version(&b.metadata.version))
        })
}

fn scan_packages(root: &Path) -> Result<Vec<CandidatePackage>, PackageError> {
    let files = files_recursively(root).map_err(|error| {
        PackageError::io_with_path("failed to scan dependency packages", root, &error)
    })?;

    Ok(files
        .into_iter()
        .filter(|relative| {
            relative
                .to_str()
                .is_some_and(|name| has_extension(name, "nupkg"))
        })
        .filter_map(|relative| {
            let path = root.join(relative);
            match PackageMetadata::from_archive(&path) {
                Ok(metadata) => Some(CandidatePackage { path, metadata }),
                Err(error) => {
                    warn!("Ignoring unreadable package {}: {error}", path.display());
                    None
                }
            }
        })
        .collect())
}

fn child_dir_named(dir: &Path, name: &str) -> Result<Option<PathBuf>, PackageError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|error| PackageError::io_with_path("failed to read directory", dir, &error))?;
    Ok(entries.flatten().map(|entry| entry.path()).find(|path| {
        path.is_dir()
            && path
                .file_name()
                .and_then(std::ffi::OsStr::to_str)
                .is_some_and(|child| child.eq_ignore_ascii_case(name))
    }))
}

fn remove_banned_profiles(work_dir: &Path) -> Result<(), PackageError> {
    let Some(lib) = child_dir_named(work_dir, "lib")? else {
        return Ok(());
    };
    let entries = std::fs::read_dir(&lib)
        .map_err(|error| PackageError::io_with_path("failed to read lib folder", &lib, &error))?;

    for path in entries.flatten().map(|entry| entry.path()) {
        let Some(name) = path.file_name().and_then(std::ffi::OsStr::to_str) else {
            continue;
        };
        let name = name.to_ascii_lowercase();
        if path.is_dir() && BANNED_PROFILES.iter().any(|banned| name.starts_with(banned)) {
            info!("Deleting {name}");
            std::fs::remove_dir_all(&path).map_err(|error| {
                PackageError::io_with_path("failed to remove profile folder", &path, &error)
            })?;
        }
    }
    Ok(())
}

fn remove_developer_documentation(work_dir: &Path) -> Result<(), PackageError> {
    let files = files_recursively(work_dir).map_err(|error| {
        PackageError::io_with_path("failed to list package contents", work_dir, &error)
    })?;
    let lowercase: HashSet<String> = files
        .iter()
        .map(|relative| relative.to_string_lossy().to_ascii_lowercase())
        .collect();

    for relative in &files {
        let name = relative.to_string_lossy();
        if !has_extension(&name, "xml") {
            continue;
        }
        let lowered = name.to_ascii_lowercase();
        let Some(stem) = lowered.strip_suffix(".xml") else {
            continue;
        };
        if lowercase.contains(&format!("{stem}.dll")) {
            let path = work_dir.join(relative);
            debug!("Removing documentation {}", path.display());
            std::fs::remove_file(&path).map_err(|error| {
                PackageError::io_with_path("failed to remove documentation file", &path, &error)
            })?;
        }
    }
    Ok(())
}
