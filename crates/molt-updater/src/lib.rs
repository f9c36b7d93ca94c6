#![allow(clippy::missing_errors_doc)]

mod download;
mod error;
pub mod hooks;
mod install;
mod logging;
mod manager;
mod progress;
mod settings;
mod shortcuts;
mod source;
mod state;

pub use download::{Downloader, HttpDownloader};
pub use error::UpdateError;
pub use install::Installer;
pub use logging::init_logging;
pub use manager::{ApplyOutcome, ManagerOptions, UpdateManager};
pub use progress::ProgressReporter;
pub use settings::UpdaterSettings;
pub use shortcuts::{
    FileShortcutStore, PinnedShortcut, ShortcutLocation, ShortcutRequest, ShortcutStore,
};
pub use source::{SourceLocation, UpdateSource};
pub use state::UpdaterState;
