use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use log::{debug, warn};
use molt_platform::RetryPolicy;
use molt_platform::fs::{files_recursively, replace_file, to_archive_path};

use crate::error::PackageError;

/// Extract every safely-named entry of `zip_path` below `dest`.
pub fn extract_zip(zip_path: &Path, dest: &Path) -> Result<(), PackageError> {
    let file = std::fs::File::open(zip_path).map_err(|error| {
        PackageError::io_with_path("failed to open package", zip_path, &error)
    })?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|error| PackageError::zip("failed to read package archive", error))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|error| PackageError::zip("failed to read package entry", error))?;
        let Some(name) = entry.enclosed_name() else {
            warn!("Skipping package entry with unsafe path: {}", entry.name());
            continue;
        };
        let out_path = dest.join(name);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|error| {
                PackageError::io_with_path("failed to create extraction directory", &out_path, &error)
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                PackageError::io_with_path(
                    "failed to create extraction parent directory",
                    parent,
                    &error,
                )
            })?;
        }
        let mut outfile = std::fs::File::create(&out_path).map_err(|error| {
            PackageError::io_with_path("failed to create extracted file", &out_path, &error)
        })?;
        std::io::copy(&mut entry, &mut outfile).map_err(|error| {
            PackageError::io_with_path("failed to extract package entry", &out_path, &error)
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
            }
        }
    }

    debug!("Extracted {} to {}", zip_path.display(), dest.display());
    Ok(())
}

/// Zip the contents of `src_dir` into `zip_path`. The archive is written
/// beside the destination first and moved into place once complete.
pub fn zip_directory(src_dir: &Path, zip_path: &Path) -> Result<(), PackageError> {
    let files = files_recursively(src_dir).map_err(|error| {
        PackageError::io_with_path("failed to list package contents", src_dir, &error)
    })?;

    let partial = zip_path.with_extension("partial");
    let result = write_zip(src_dir, &files, &partial).and_then(|()| {
        replace_file(&partial, zip_path, &RetryPolicy::default()).map_err(|error| {
            PackageError::io_with_path("failed to move package into place", zip_path, &error)
        })
    });

    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

fn write_zip(
    src_dir: &Path,
    files: &[std::path::PathBuf],
    zip_path: &Path,
) -> Result<(), PackageError> {
    let file = std::fs::File::create(zip_path).map_err(|error| {
        PackageError::io_with_path("failed to create package", zip_path, &error)
    })?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for relative in files {
        let source = src_dir.join(relative);
        writer
            .start_file(to_archive_path(relative), entry_options(options, &source))
            .map_err(|error| PackageError::zip("failed to start package entry", error))?;
        let mut input = std::fs::File::open(&source).map_err(|error| {
            PackageError::io_with_path("failed to open file for packaging", &source, &error)
        })?;
        std::io::copy(&mut input, &mut writer).map_err(|error| {
            PackageError::io_with_path("failed to write package entry", &source, &error)
        })?;
    }

    let mut file = writer
        .finish()
        .map_err(|error| PackageError::zip("failed to finalize package", error))?;
    file.flush().map_err(|error| {
        PackageError::io_with_path("failed to flush package", zip_path, &error)
    })?;
    Ok(())
}

#[cfg(unix)]
fn entry_options(
    options: zip::write::SimpleFileOptions,
    source: &Path,
) -> zip::write::SimpleFileOptions {
    use std::os::unix::fs::PermissionsExt;

    match std::fs::metadata(source) {
        Ok(metadata) => options.unix_permissions(metadata.permissions().mode()),
        Err(_) => options,
    }
}

#[cfg(not(unix))]
fn entry_options(
    options: zip::write::SimpleFileOptions,
    _source: &Path,
) -> zip::write::SimpleFileOptions {
    options
}

/// Every file entry of `zip_path`, keyed by its archive path.
pub fn read_entries(zip_path: &Path) -> Result<BTreeMap<String, Vec<u8>>, PackageError> {
    let file = std::fs::File::open(zip_path).map_err(|error| {
        PackageError::io_with_path("failed to open package", zip_path, &error)
    })?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|error| PackageError::zip("failed to read package archive", error))?;

    let mut entries = BTreeMap::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|error| PackageError::zip("failed to read package entry", error))?;
        if entry.is_dir() {
            continue;
        }
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(|error| {
            PackageError::io_with_path("failed to read package entry", zip_path, &error)
        })?;
        entries.insert(entry.name().replace('\\', "/"), data);
    }
    Ok(entries)
}
