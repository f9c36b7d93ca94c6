use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};

/// Retry policy for filesystem deletes. Antivirus scanners and indexers
/// routinely hold short-lived handles on freshly written files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    fn run<T>(&self, mut operation: impl FnMut() -> std::io::Result<T>) -> std::io::Result<T> {
        let mut remaining = self.retries;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Err(error),
                Err(error) if remaining == 0 => return Err(error),
                Err(error) => {
                    debug!("retrying after filesystem error: {error}");
                    remaining -= 1;
                    std::thread::sleep(self.delay);
                }
            }
        }
    }
}

/// Recursively delete `path`, retrying each individual delete according to
/// `policy`. A missing directory is not an error.
pub fn delete_directory(path: &Path, policy: &RetryPolicy) -> std::io::Result<()> {
    if !path.exists() {
        warn!("delete_directory: does not exist - {}", path.display());
        return Ok(());
    }

    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries.collect::<Result<Vec<_>, _>>()?,
        Err(error) if error.kind() == std::io::ErrorKind::PermissionDenied => {
            warn!("The contents of {} could not be read: {error}", path.display());
            Vec::new()
        }
        Err(error) => return Err(error),
    };

    for entry in entries {
        let child = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            delete_directory(&child, policy)?;
        } else {
            clear_readonly(&child);
            match policy.run(|| std::fs::remove_file(&child)) {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(error),
            }
        }
    }

    clear_readonly(path);
    match policy.run(|| std::fs::remove_dir(path)) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => {
            warn!("delete_directory: could not delete {}: {error}", path.display());
            Err(error)
        }
    }
}

fn clear_readonly(path: &Path) {
    if let Ok(metadata) = std::fs::symlink_metadata(path) {
        let mut permissions = metadata.permissions();
        if permissions.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            permissions.set_readonly(false);
            let _ = std::fs::set_permissions(path, permissions);
        }
    }
}

pub fn delete_file(path: &Path, policy: &RetryPolicy) -> std::io::Result<()> {
    clear_readonly(path);
    match policy.run(|| std::fs::remove_file(path)) {
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Stage `data` in a temp file beside `path` and move it over `path`, so
/// readers see either the old contents or the new ones. Uses the default
/// [`RetryPolicy`] for the final move.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    write_atomic_with(path, data, &RetryPolicy::default())
}

/// [`write_atomic`] with an explicit policy for the final move. A
/// destination held open by another process fails the move, so it is
/// retried like a delete. The staged file is removed when the move gives up.
pub fn write_atomic_with(path: &Path, data: &[u8], policy: &RetryPolicy) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut staged = tempfile::Builder::new()
        .prefix(".molt-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    staged.write_all(data)?;
    staged.as_file().sync_all()?;

    let mut remaining = policy.retries;
    loop {
        match staged.persist(path) {
            Ok(_) => return Ok(()),
            Err(error) if remaining == 0 => return Err(error.error),
            Err(tempfile::PersistError { error, file }) => {
                debug!("retrying move into {}: {error}", path.display());
                remaining -= 1;
                std::thread::sleep(policy.delay);
                staged = file;
            }
        }
    }
}

/// Move `src` over `dst`, replacing `dst` if it exists, retrying under
/// `policy` while `dst` is held open. A missing `src` fails at once.
pub fn replace_file(src: &Path, dst: &Path, policy: &RetryPolicy) -> std::io::Result<()> {
    policy.run(|| std::fs::rename(src, dst))
}

pub fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&src_path, &dest_path)?;
        } else {
            std::fs::copy(&src_path, &dest_path).map_err(|error| {
                std::io::Error::new(
                    error.kind(),
                    format!("{} -> {}: {error}", src_path.display(), dest_path.display()),
                )
            })?;
        }
    }
    Ok(())
}

/// Every regular file below `root`, as paths relative to `root`, sorted.
pub fn files_recursively(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                walk(root, &path, out)?;
            } else if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_path_buf());
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(root, root, &mut files)?;
    files.sort();
    Ok(files)
}

/// Render a relative path with forward slashes, the separator used inside
/// package archives.
#[must_use]
pub fn to_archive_path(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::{
        RetryPolicy, copy_dir_recursive, delete_directory, files_recursively, replace_file,
        to_archive_path, write_atomic, write_atomic_with,
    };

    fn temp_leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .expect("dir should be readable")
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with(".tmp"))
            .collect()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(1, Duration::from_millis(1))
    }

    #[test]
    fn delete_directory_removes_nested_tree() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let root = temp.path().join("app-1.0");
        std::fs::create_dir_all(root.join("nested/deeper")).expect("tree should be created");
        std::fs::write(root.join("a.txt"), b"a").expect("file should be written");
        std::fs::write(root.join("nested/deeper/b.txt"), b"b").expect("file should be written");

        delete_directory(&root, &fast_policy()).expect("delete should succeed");

        assert!(!root.exists());
    }

    #[test]
    fn delete_directory_clears_readonly_files() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let root = temp.path().join("ro");
        std::fs::create_dir_all(&root).expect("dir should be created");
        let file = root.join("locked.bin");
        std::fs::write(&file, b"data").expect("file should be written");
        let mut permissions = std::fs::metadata(&file).expect("metadata").permissions();
        permissions.set_readonly(true);
        std::fs::set_permissions(&file, permissions).expect("permissions should be set");

        delete_directory(&root, &fast_policy()).expect("delete should succeed");

        assert!(!root.exists());
    }

    #[test]
    fn delete_directory_missing_is_ok() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        delete_directory(&temp.path().join("missing"), &fast_policy())
            .expect("missing directory should not be an error");
    }

    #[test]
    fn write_atomic_replaces_existing_contents() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("RELEASES");
        std::fs::write(&path, "old").expect("seed file should be written");

        write_atomic(&path, b"new").expect("atomic write should succeed");

        assert_eq!(std::fs::read_to_string(&path).expect("readable"), "new");
        assert!(temp_leftovers(temp.path()).is_empty());
    }

    #[test]
    fn write_atomic_gives_up_and_cleans_up_when_the_target_stays_blocked() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let blocked = temp.path().join("RELEASES");
        std::fs::create_dir_all(blocked.join("occupied")).expect("blocking dir should exist");

        let error = write_atomic_with(&blocked, b"new", &fast_policy())
            .expect_err("a non-empty directory cannot be replaced by a file");

        assert_ne!(error.kind(), std::io::ErrorKind::NotFound);
        assert!(blocked.join("occupied").is_dir());
        assert!(temp_leftovers(temp.path()).is_empty());
    }

    #[test]
    fn replace_file_overwrites_destination() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let src = temp.path().join("package.partial");
        let dst = temp.path().join("package.nupkg");
        std::fs::write(&src, b"fresh").expect("source should be written");
        std::fs::write(&dst, b"stale").expect("destination should be written");

        replace_file(&src, &dst, &fast_policy()).expect("replace should succeed");

        assert_eq!(std::fs::read(&dst).expect("destination readable"), b"fresh");
        assert!(!src.exists());
    }

    #[test]
    fn replace_file_does_not_wait_for_a_missing_source() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let slow = RetryPolicy::new(5, Duration::from_secs(2));
        let started = std::time::Instant::now();

        let error = replace_file(
            &temp.path().join("missing.partial"),
            &temp.path().join("package.nupkg"),
            &slow,
        )
        .expect_err("missing source should fail");

        assert_eq!(error.kind(), std::io::ErrorKind::NotFound);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn files_recursively_returns_sorted_relative_paths() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        std::fs::create_dir_all(temp.path().join("lib/net45")).expect("dirs");
        std::fs::write(temp.path().join("lib/net45/b.dll"), b"b").expect("file");
        std::fs::write(temp.path().join("a.nuspec"), b"a").expect("file");

        let files = files_recursively(temp.path()).expect("walk should succeed");

        assert_eq!(
            files,
            vec![
                PathBuf::from("a.nuspec"),
                Path::new("lib").join("net45").join("b.dll"),
            ]
        );
        assert_eq!(to_archive_path(&files[1]), "lib/net45/b.dll");
    }

    #[test]
    fn copy_dir_recursive_copies_tree() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("sub")).expect("dirs");
        std::fs::write(src.join("sub/file.txt"), b"content").expect("file");

        let dest = temp.path().join("dest");
        copy_dir_recursive(&src, &dest).expect("copy should succeed");

        assert_eq!(
            std::fs::read(dest.join("sub/file.txt")).expect("copied file"),
            b"content"
        );
    }
}
