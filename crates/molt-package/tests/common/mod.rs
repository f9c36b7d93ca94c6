#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use molt_package::ReleasePackager;

pub fn nuspec(id: &str, version: &str, dependencies: &[(&str, &str)], notes: Option<&str>) -> String {
    let dependencies = if dependencies.is_empty() {
        String::new()
    } else {
        let list: String = dependencies
            .iter()
            .map(|(id, range)| format!(r#"      <dependency id="{id}" version="{range}" />"#))
            .collect::<Vec<_>>()
            .join("\n");
        format!("    <dependencies>\n{list}\n    </dependencies>\n")
    };
    let notes = notes
        .map(|notes| format!("    <releaseNotes>{notes}</releaseNotes>\n"))
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://schemas.microsoft.com/packaging/2010/07/nuspec.xsd">
  <metadata>
    <id>{id}</id>
    <version>{version}</version>
    <title>{id}</title>
{notes}{dependencies}  </metadata>
</package>
"#
    )
}

pub fn write_package(path: &Path, nuspec: &str, files: &[(&str, &[u8])]) {
    let id = nuspec
        .split("<id>")
        .nth(1)
        .and_then(|rest| rest.split("</id>").next())
        .expect("nuspec should name an id");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("package directory should be created");
    }

    let file = std::fs::File::create(path).expect("package file should be created");
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();

    writer
        .start_file(format!("{id}.nuspec"), options)
        .expect("nuspec entry should be started");
    writer
        .write_all(nuspec.as_bytes())
        .expect("nuspec entry should be written");
    for (name, data) in files {
        writer
            .start_file(*name, options)
            .expect("package entry should be started");
        writer.write_all(data).expect("package entry should be written");
    }
    writer.finish().expect("package should be finalized");
}

/// Build a developer package under `scratch` and turn it into a release
/// package inside `releases_dir`.
pub fn release(
    scratch: &Path,
    releases_dir: &Path,
    id: &str,
    version: &str,
    files: &[(&str, &[u8])],
) -> PathBuf {
    let input = scratch.join(format!("{id}.{version}.nupkg"));
    write_package(&input, &nuspec(id, version, &[], None), files);

    let packager = ReleasePackager::new(&input).with_machine_cache(None);
    let name = packager
        .suggested_release_file_name()
        .expect("release name should be derived");
    std::fs::create_dir_all(releases_dir).expect("releases directory should be created");
    packager
        .build_release_package(&releases_dir.join(name), None)
        .expect("release package should be built")
}

pub fn payload(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i % 251).unwrap_or(0).wrapping_add(seed))
        .collect()
}
