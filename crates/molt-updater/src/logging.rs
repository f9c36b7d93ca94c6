use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use molt_platform::InstallPaths;
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};

use crate::settings::UpdaterSettings;

/// Append-only handle on an installation's log. An uninstall or a user may
/// delete the file while the updater runs; the next record recreates it as
/// long as its directory still exists.
struct InstallLog {
    path: PathBuf,
    file: File,
}

impl InstallLog {
    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn reopen_if_removed(&mut self) -> io::Result<()> {
        if !self.path.exists() {
            *self = Self::open(&self.path)?;
        }
        Ok(())
    }
}

impl Write for InstallLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.reopen_if_removed()?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn backup_path(log_path: &Path) -> PathBuf {
    let mut name = log_path.file_name().unwrap_or_default().to_os_string();
    name.push(".1");
    log_path.with_file_name(name)
}

/// Move a log larger than `max_bytes` to `<name>.1`, replacing the previous
/// backup, so each installation keeps at most two logs.
fn rotate_if_oversized(log_path: &Path, max_bytes: u64) -> io::Result<bool> {
    match std::fs::metadata(log_path) {
        Ok(metadata) if metadata.len() > max_bytes => {
            std::fs::rename(log_path, backup_path(log_path))?;
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error),
    }
}

fn level_for(settings: &UpdaterSettings) -> LevelFilter {
    if settings.debug_logging {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Send records from the `molt` crates to the installation's `molt.log`,
/// rotating it first when it outgrows `max_log_size_bytes`. Returns `false`
/// when the log cannot be opened or the process already has a logger.
pub fn init_logging(paths: &InstallPaths, settings: &UpdaterSettings) -> bool {
    let log_path = paths.log_file();
    if std::fs::create_dir_all(&paths.app_root).is_err() {
        return false;
    }

    let rotated = rotate_if_oversized(&log_path, settings.max_log_size_bytes);
    let Ok(log) = InstallLog::open(&log_path) else {
        return false;
    };

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("molt")
        .build();
    if WriteLogger::init(level_for(settings), config, log).is_err() {
        debug!("A logger is already installed, not logging to {}", log_path.display());
        return false;
    }

    match rotated {
        Ok(true) => debug!(
            "Rotated {} to {}",
            log_path.display(),
            backup_path(&log_path).display()
        ),
        Ok(false) => {}
        Err(error) => warn!("Could not rotate {}: {error}", log_path.display()),
    }
    true
}
