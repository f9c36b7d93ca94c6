use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A 2 to 4 component numeric release version (`major.minor[.build[.revision]]`).
///
/// A missing component sorts before any present one, so `1.0 < 1.0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReleaseVersion {
    pub major: u32,
    pub minor: u32,
    pub build: Option<u32>,
    pub revision: Option<u32>,
}

impl ReleaseVersion {
    #[must_use]
    pub fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            build: None,
            revision: None,
        }
    }

    #[must_use]
    pub fn with_build(mut self, build: u32) -> Self {
        self.build = Some(build);
        self
    }

    #[must_use]
    pub fn with_revision(mut self, revision: u32) -> Self {
        if self.build.is_none() {
            self.build = Some(0);
        }
        self.revision = Some(revision);
        self
    }

    /// Build a version from 2 to 4 numeric components.
    #[must_use]
    pub fn from_components(components: &[u32]) -> Option<Self> {
        match *components {
            [major, minor] => Some(Self::new(major, minor)),
            [major, minor, build] => Some(Self::new(major, minor).with_build(build)),
            [major, minor, build, revision] => Some(Self {
                major,
                minor,
                build: Some(build),
                revision: Some(revision),
            }),
            _ => None,
        }
    }

    /// Derive the version from a release filename: every purely numeric
    /// `.`/`-` separated part of the name, once the package extension and
    /// delta suffix are removed, must form 2 to 4 components.
    #[must_use]
    pub fn from_filename(filename: &str) -> Option<Self> {
        let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
        let name = strip_suffix_ignore_case(name, ".nupkg");
        let name = strip_suffix_ignore_case(name, "-delta");

        let mut components = Vec::with_capacity(4);
        for part in name.split(['.', '-']) {
            if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
                components.push(part.parse().ok()?);
            }
        }

        Self::from_components(&components)
    }
}

fn strip_suffix_ignore_case<'a>(value: &'a str, suffix: &str) -> &'a str {
    let Some(split) = value.len().checked_sub(suffix.len()) else {
        return value;
    };
    match value.get(split..) {
        Some(tail) if tail.eq_ignore_ascii_case(suffix) => &value[..split],
        _ => value,
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(build) = self.build {
            write!(f, ".{build}")?;
            if let Some(revision) = self.revision {
                write!(f, ".{revision}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Expected 2 to 4 numeric components, got: {input}")]
pub struct VersionParseError {
    pub input: String,
}

impl FromStr for ReleaseVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || VersionParseError {
            input: s.to_string(),
        };

        let components = s
            .split('.')
            .map(str::parse)
            .collect::<Result<Vec<u32>, _>>()
            .map_err(|_| invalid())?;

        Self::from_components(&components).ok_or_else(invalid)
    }
}
