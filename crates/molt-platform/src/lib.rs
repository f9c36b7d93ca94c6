#![allow(clippy::missing_errors_doc)]

mod deferred;
mod error;
pub mod fs;
mod lock;
mod paths;
mod process;

pub use deferred::{DeferredDeletes, PendingDelete, Removal, remove_or_defer};
pub use error::PlatformError;
pub use fs::RetryPolicy;
pub use lock::{DEFAULT_LOCK_TIMEOUT, LockError, UpdateLock, lock_key};
pub use paths::{
    InstallPaths, InstallPathsError, is_version_dir_name, version_dir_name, version_of_dir,
};
pub use process::{HideWindow, executables_in, is_executable};

#[cfg(target_os = "windows")]
pub(crate) fn wide(path: &std::path::Path) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;

    path.as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}
