use std::fmt;

/// Where an [`UpdateManager`](crate::UpdateManager) is in its lifecycle.
/// Every phase settles back to `Idle`, or to `Failed` on an unrecovered
/// error; `Failed` clears on the next successful lock acquisition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdaterState {
    #[default]
    Idle,
    CheckingForUpdate,
    Downloading,
    Applying,
    Failed,
}

impl UpdaterState {
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::CheckingForUpdate | Self::Downloading | Self::Applying
        )
    }
}

impl fmt::Display for UpdaterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::CheckingForUpdate => "checking for update",
            Self::Downloading => "downloading",
            Self::Applying => "applying",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}
