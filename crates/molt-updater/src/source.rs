use std::fmt;
use std::path::PathBuf;

use molt_release::MANIFEST_FILE_NAME;

/// Where releases come from: an HTTP(S) endpoint or a local directory
/// holding a `RELEASES` file and its packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSource {
    Url(String),
    Directory(PathBuf),
}

/// Location of one artifact within an [`UpdateSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Url(String),
    Path(PathBuf),
}

impl UpdateSource {
    /// Sniff the scheme: `http://` or `https://` (any case) is a URL,
    /// anything else a directory path.
    #[must_use]
    pub fn parse(location: &str) -> Self {
        let trimmed = location.trim();
        let lowered = trimmed.to_ascii_lowercase();
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            Self::Url(trimmed.trim_end_matches('/').to_string())
        } else {
            Self::Directory(PathBuf::from(trimmed))
        }
    }

    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Url(_))
    }

    #[must_use]
    pub fn manifest(&self) -> SourceLocation {
        self.artifact(MANIFEST_FILE_NAME)
    }

    #[must_use]
    pub fn artifact(&self, filename: &str) -> SourceLocation {
        match self {
            Self::Url(base) => SourceLocation::Url(format!("{base}/{filename}")),
            Self::Directory(dir) => SourceLocation::Path(dir.join(filename)),
        }
    }
}

impl From<PathBuf> for UpdateSource {
    fn from(dir: PathBuf) -> Self {
        Self::Directory(dir)
    }
}

impl fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{url}"),
            Self::Directory(dir) => write!(f, "{}", dir.display()),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{url}"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}
