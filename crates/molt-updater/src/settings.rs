use std::path::Path;
use std::time::Duration;

use log::warn;
use molt_platform::RetryPolicy;
use molt_platform::fs::write_atomic;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterSettings {
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,

    #[serde(default = "default_delete_retries")]
    pub delete_retries: u32,

    #[serde(default = "default_delete_retry_delay")]
    pub delete_retry_delay_ms: u64,

    #[serde(default = "default_hook_timeout")]
    pub hook_timeout_secs: u64,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,

    #[serde(default)]
    pub ignore_delta_updates: bool,
}

fn default_lock_timeout() -> u64 {
    2000
}

fn default_download_concurrency() -> usize {
    4
}

fn default_http_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_retry_delays() -> Vec<u64> {
    vec![0, 2, 5]
}

fn default_delete_retries() -> u32 {
    2
}

fn default_delete_retry_delay() -> u64 {
    250
}

fn default_hook_timeout() -> u64 {
    15
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout(),
            download_concurrency: default_download_concurrency(),
            http_timeout_secs: default_http_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            retry_delays_secs: default_retry_delays(),
            delete_retries: default_delete_retries(),
            delete_retry_delay_ms: default_delete_retry_delay(),
            hook_timeout_secs: default_hook_timeout(),
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
            ignore_delta_updates: false,
        }
    }
}

impl UpdaterSettings {
    /// Read settings from `path`. A missing file yields the defaults; an
    /// unreadable or corrupt one is logged and also yields the defaults.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                warn!("Ignoring corrupt settings {}: {error}", path.display());
                Self::default()
            }),
            Err(error) => {
                warn!("Could not read settings {}: {error}", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        write_atomic(path, content.as_bytes())
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    #[must_use]
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.delete_retries,
            Duration::from_millis(self.delete_retry_delay_ms),
        )
    }

    /// At least one transfer at a time, whatever the file says.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.download_concurrency.max(1)
    }
}
