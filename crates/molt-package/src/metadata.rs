use std::io::Read;
use std::path::{Path, PathBuf};

use log::debug;
use molt_release::{ReleaseEntry, UpdateInfo};
use quick_xml::events::{BytesCData, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::PackageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDependency {
    pub id: String,
    pub version_range: Option<String>,
    pub target_framework: Option<String>,
}

/// The fields of a package's embedded `.nuspec` manifest the updater uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMetadata {
    pub id: String,
    pub version: String,
    pub title: Option<String>,
    pub release_notes: Option<String>,
    pub dependencies: Vec<PackageDependency>,
}

impl PackageMetadata {
    pub fn parse(xml: &str) -> Result<Self, PackageError> {
        let mut reader = Reader::from_str(xml);
        let mut path: Vec<String> = Vec::new();
        let mut text = String::new();
        let mut group_framework: Option<String> = None;
        let mut metadata = Self::default();

        loop {
            let event = reader
                .read_event()
                .map_err(|error| PackageError::xml("failed to parse package manifest", error))?;
            match event {
                Event::Start(element) => {
                    let name = local_name(&element);
                    if name == "group" && path.last().is_some_and(|p| p == "dependencies") {
                        group_framework = attribute(&element, "targetFramework")?;
                    } else if name == "dependency" {
                        metadata
                            .dependencies
                            .push(dependency(&element, group_framework.clone())?);
                    }
                    path.push(name);
                    text.clear();
                }
                Event::Empty(element) => {
                    if local_name(&element) == "dependency" {
                        metadata
                            .dependencies
                            .push(dependency(&element, group_framework.clone())?);
                    }
                }
                Event::Text(content) => {
                    let content = content
                        .unescape()
                        .map_err(|error| PackageError::xml("invalid package manifest text", error))?;
                    text.push_str(&content);
                }
                Event::CData(content) => {
                    text.push_str(&String::from_utf8_lossy(&content));
                }
                Event::End(_) => {
                    let name = path.pop().unwrap_or_default();
                    if name == "group" {
                        group_framework = None;
                    }
                    if is_metadata_path(&path) {
                        let value = text.trim().to_string();
                        match name.as_str() {
                            "id" => metadata.id = value,
                            "version" => metadata.version = value,
                            "title" => metadata.title = Some(value),
                            "releasenotes" => metadata.release_notes = Some(value),
                            _ => {}
                        }
                    }
                    text.clear();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if metadata.id.is_empty() || metadata.version.is_empty() {
            return Err(PackageError::xml(
                "package manifest is missing id or version",
                xml.chars().take(80).collect::<String>(),
            ));
        }
        Ok(metadata)
    }

    pub fn from_archive(package: &Path) -> Result<Self, PackageError> {
        let file = std::fs::File::open(package).map_err(|error| {
            PackageError::io_with_path("failed to open package", package, &error)
        })?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|error| PackageError::zip("failed to read package archive", error))?;

        let Some(name) = archive
            .file_names()
            .find(|name| !name.contains('/') && has_extension(name, "nuspec"))
            .map(str::to_string)
        else {
            return Err(PackageError::invalid(package, "no .nuspec manifest found"));
        };

        let mut entry = archive
            .by_name(&name)
            .map_err(|error| PackageError::zip("failed to read package manifest", error))?;
        let mut xml = String::new();
        entry.read_to_string(&mut xml).map_err(|error| {
            PackageError::io_with_path("failed to read package manifest", package, &error)
        })?;
        Self::parse(&xml)
    }
}

fn is_metadata_path(path: &[String]) -> bool {
    matches!(path, [package, metadata] if package == "package" && metadata == "metadata")
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).to_ascii_lowercase()
}

fn attribute(element: &BytesStart<'_>, key: &str) -> Result<Option<String>, PackageError> {
    for attr in element.attributes() {
        let attr = attr.map_err(|error| PackageError::xml("invalid manifest attribute", error))?;
        if attr.key.local_name().as_ref().eq_ignore_ascii_case(key.as_bytes()) {
            let value = attr
                .unescape_value()
                .map_err(|error| PackageError::xml("invalid manifest attribute", error))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn dependency(
    element: &BytesStart<'_>,
    target_framework: Option<String>,
) -> Result<PackageDependency, PackageError> {
    let id = attribute(element, "id")?
        .ok_or_else(|| PackageError::xml("dependency without id", local_name(element)))?;
    Ok(PackageDependency {
        id,
        version_range: attribute(element, "version")?,
        target_framework,
    })
}

pub(crate) fn has_extension(name: &str, extension: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

pub fn find_nuspec(dir: &Path) -> Result<PathBuf, PackageError> {
    let entries = std::fs::read_dir(dir).map_err(|error| {
        PackageError::io_with_path("failed to read package directory", dir, &error)
    })?;
    let mut found: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .is_some_and(|name| has_extension(name, "nuspec"))
        })
        .collect();
    found.sort();
    found
        .into_iter()
        .next()
        .ok_or_else(|| PackageError::invalid(dir, "no .nuspec manifest found"))
}

/// Drop the `<dependencies>` element so an installed release never triggers
/// another resolution pass.
pub fn remove_dependencies(xml: &str) -> Result<String, PackageError> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut skip_depth = 0_usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|error| PackageError::xml("failed to parse package manifest", error))?;
        match &event {
            Event::Eof => break,
            Event::Start(_) if skip_depth > 0 => {
                skip_depth += 1;
                continue;
            }
            Event::End(_) if skip_depth > 0 => {
                skip_depth -= 1;
                continue;
            }
            _ if skip_depth > 0 => continue,
            Event::Start(element) if local_name(element) == "dependencies" => {
                skip_depth = 1;
                continue;
            }
            Event::Empty(element) if local_name(element) == "dependencies" => continue,
            _ => {}
        }
        writer
            .write_event(event)
            .map_err(|error| PackageError::xml("failed to write package manifest", error))?;
    }

    into_string(writer)
}

/// Replace the text of `<releaseNotes>` with `transform(text)` wrapped in
/// CDATA. A manifest without release notes is returned unchanged.
pub fn rewrite_release_notes(
    xml: &str,
    transform: &dyn Fn(&str) -> String,
) -> Result<String, PackageError> {
    let metadata = PackageMetadata::parse(xml)?;
    let Some(notes) = metadata.release_notes else {
        debug!("No release notes found in package {}", metadata.id);
        return Ok(xml.to_string());
    };
    let rendered = transform(&notes);

    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut path: Vec<String> = Vec::new();
    let mut skip_depth = 0_usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|error| PackageError::xml("failed to parse package manifest", error))?;
        match event {
            Event::Eof => break,
            Event::Start(_) if skip_depth > 0 => skip_depth += 1,
            Event::End(end) if skip_depth > 0 => {
                skip_depth -= 1;
                if skip_depth == 0 {
                    path.pop();
                    write(&mut writer, Event::End(end))?;
                }
            }
            _ if skip_depth > 0 => {}
            Event::Start(element) => {
                let name = local_name(&element);
                let replace = name == "releasenotes" && is_metadata_path(&path);
                path.push(name);
                write(&mut writer, Event::Start(element))?;
                if replace {
                    write_cdata(&mut writer, &rendered)?;
                    skip_depth = 1;
                }
            }
            Event::End(end) => {
                path.pop();
                write(&mut writer, Event::End(end))?;
            }
            other => write(&mut writer, other)?,
        }
    }

    into_string(writer)
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), PackageError> {
    writer
        .write_event(event)
        .map_err(|error| PackageError::xml("failed to write package manifest", error))
}

fn write_cdata(writer: &mut Writer<Vec<u8>>, content: &str) -> Result<(), PackageError> {
    // "]]>" cannot appear inside one section; split it across two.
    let mut rest = content;
    while let Some(index) = rest.find("]]>") {
        write(writer, Event::CData(BytesCData::new(&rest[..index + 2])))?;
        rest = &rest[index + 2..];
    }
    write(writer, Event::CData(BytesCData::new(rest)))
}

fn into_string(writer: Writer<Vec<u8>>) -> Result<String, PackageError> {
    String::from_utf8(writer.into_inner())
        .map_err(|error| PackageError::xml("package manifest is not UTF-8", error))
}

/// Release notes for every release an update would apply.
pub trait FetchReleaseNotes {
    fn fetch_release_notes(
        &self,
        package_dir: &Path,
    ) -> Result<Vec<(ReleaseEntry, Option<String>)>, PackageError>;
}

impl FetchReleaseNotes for UpdateInfo {
    fn fetch_release_notes(
        &self,
        package_dir: &Path,
    ) -> Result<Vec<(ReleaseEntry, Option<String>)>, PackageError> {
        self.releases_to_apply()
            .iter()
            .map(|entry| {
                let metadata = PackageMetadata::from_archive(&package_dir.join(entry.filename()))?;
                Ok((entry.clone(), metadata.release_notes))
            })
            .collect()
    }
}
