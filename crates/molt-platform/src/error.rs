use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("could not delete {} and could not schedule it for later deletion: {source}", path.display())]
    DeferredDelete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is outside {} and cannot be deferred from here", path.display(), scope.display())]
    OutsideScope { path: PathBuf, scope: PathBuf },
}
