use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use molt_platform::HideWindow;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{HookError, HookRequest, HookResponse, HookRunner};

/// First argument passed to a hook module so it knows to speak the
/// stdin/stdout protocol instead of starting normally.
pub const HOOK_ARGUMENT: &str = "--molt-hook";

/// [`HookRunner`] that starts the module as a child process, writes the
/// JSON request to its stdin, and reads a JSON response from its stdout.
/// Empty output is an empty response.
#[derive(Debug, Clone)]
pub struct ProcessHookRunner {
    timeout: Duration,
}

impl ProcessHookRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HookRunner for ProcessHookRunner {
    async fn run(&self, module: &Path, request: &HookRequest) -> Result<HookResponse, HookError> {
        let payload = serde_json::to_vec(request).map_err(HookError::Protocol)?;

        let mut command = Command::new(module);
        command
            .arg(HOOK_ARGUMENT)
            .hide_window()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = module.parent() {
            command.current_dir(dir);
        }

        debug!("Running {} hook in {}", request.name(), module.display());
        let mut child = command.spawn().map_err(HookError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload).await {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("{} closed stdin before reading the request", module.display());
                }
                Err(error) => return Err(HookError::Io(error)),
            }
            drop(stdin);
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| HookError::Timeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(HookError::Io)?;

        if !output.status.success() {
            return Err(HookError::Exit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(HookResponse::default());
        }
        serde_json::from_slice(&output.stdout).map_err(HookError::Protocol)
    }
}
