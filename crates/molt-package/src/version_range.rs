use std::str::FromStr;

use semver::Version;

/// A dependency version constraint in NuGet interval notation:
/// `1.0` (at least 1.0), `[1.0]` (exactly), `[1.0,2.0)`, `(,1.0]`, `(1.0,)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionRange {
    pub min: Option<Version>,
    pub min_inclusive: bool,
    pub max: Option<Version>,
    pub max_inclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid version range: {input}")]
pub struct VersionRangeError {
    pub input: String,
}

impl VersionRange {
    /// Any version satisfies an unconstrained range.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// An inverted range, or a single point with an exclusive bound.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => {
                max < min || (max == min && !(self.min_inclusive && self.max_inclusive))
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        if self.is_degenerate() {
            return false;
        }
        let above_min = match &self.min {
            Some(min) if self.min_inclusive => version >= min,
            Some(min) => version > min,
            None => true,
        };
        let below_max = match &self.max {
            Some(max) if self.max_inclusive => version <= max,
            Some(max) => version < max,
            None => true,
        };
        above_min && below_max
    }

    /// Match a version string as written in a package manifest.
    #[must_use]
    pub fn matches_str(&self, version: &str) -> bool {
        parse_package_version(version).is_some_and(|version| self.matches(&version))
    }
}

impl FromStr for VersionRange {
    type Err = VersionRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let invalid = || VersionRangeError {
            input: input.to_string(),
        };
        let bound = |value: &str| -> Result<Option<Version>, VersionRangeError> {
            let value = value.trim();
            if value.is_empty() {
                Ok(None)
            } else {
                parse_package_version(value).map(Some).ok_or_else(invalid)
            }
        };

        if input.is_empty() {
            return Ok(Self::any());
        }

        let min_inclusive = match input.as_bytes()[0] {
            b'[' => true,
            b'(' => false,
            _ => {
                return Ok(Self {
                    min: bound(input)?,
                    min_inclusive: true,
                    max: None,
                    max_inclusive: false,
                });
            }
        };
        let max_inclusive = match input.as_bytes()[input.len() - 1] {
            b']' => true,
            b')' => false,
            _ => return Err(invalid()),
        };
        if input.len() < 2 {
            return Err(invalid());
        }

        let inner = &input[1..input.len() - 1];
        match inner.split_once(',') {
            Some((min, max)) => {
                if max.contains(',') {
                    return Err(invalid());
                }
                Ok(Self {
                    min: bound(min)?,
                    min_inclusive,
                    max: bound(max)?,
                    max_inclusive,
                })
            }
            None if min_inclusive && max_inclusive => {
                let exact = bound(inner)?.ok_or_else(invalid)?;
                Ok(Self {
                    min: Some(exact.clone()),
                    min_inclusive: true,
                    max: Some(exact),
                    max_inclusive: true,
                })
            }
            None => Err(invalid()),
        }
    }
}

/// Parse a package version, padding missing components (`1.2` → `1.2.0`).
/// A fourth numeric component is carried as build metadata.
#[must_use]
pub fn parse_package_version(version: &str) -> Option<Version> {
    if let Ok(parsed) = Version::parse(version) {
        return Some(parsed);
    }

    let (core, suffix) = split_core_and_suffix(version);
    let mut parts = core.split('.');
    let major = parts.next()?.parse::<u64>().ok()?;
    let minor = parts.next().map(str::parse::<u64>).transpose().ok()?;
    let patch = parts.next().map(str::parse::<u64>).transpose().ok()?;
    let revision = parts.next().map(str::parse::<u64>).transpose().ok()?;

    if parts.next().is_some() {
        return None;
    }

    let normalized = match (minor, patch, revision) {
        (None, _, _) => format!("{major}.0.0{suffix}"),
        (Some(minor), None, _) => format!("{major}.{minor}.0{suffix}"),
        (Some(minor), Some(patch), None) => format!("{major}.{minor}.{patch}{suffix}"),
        (Some(minor), Some(patch), Some(revision)) if suffix.contains('+') => {
            format!("{major}.{minor}.{patch}{suffix}.{revision}")
        }
        (Some(minor), Some(patch), Some(revision)) => {
            format!("{major}.{minor}.{patch}{suffix}+{revision}")
        }
    };

    Version::parse(&normalized).ok()
}

fn split_core_and_suffix(version: &str) -> (&str, &str) {
    let suffix_idx = version.find(['-', '+']).unwrap_or(version.len());
    (&version[..suffix_idx], &version[suffix_idx..])
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{VersionRange, parse_package_version};

    fn range(input: &str) -> VersionRange {
        input.parse().expect("range should parse")
    }

    #[test]
    fn bare_version_is_minimum_inclusive() {
        let range = range("1.0");
        assert!(range.matches_str("1.0"));
        assert!(range.matches_str("3.5.1"));
        assert!(!range.matches_str("0.9"));
    }

    #[test]
    fn interval_bounds_respect_inclusivity() {
        let range = range("[1.0,2.0)");
        assert!(range.matches_str("1.0.0"));
        assert!(range.matches_str("1.9.9"));
        assert!(!range.matches_str("2.0"));

        let open_min = VersionRange::from_str("(,1.5]").expect("range should parse");
        assert!(open_min.matches_str("0.1"));
        assert!(open_min.matches_str("1.5"));
        assert!(!open_min.matches_str("1.5.1"));
    }

    #[test]
    fn exact_version_matches_only_itself() {
        let range = range("[1.2.3]");
        assert!(range.matches_str("1.2.3"));
        assert!(!range.matches_str("1.2.4"));
    }

    #[test]
    fn degenerate_ranges_match_nothing() {
        assert!(range("[2.0,1.0]").is_degenerate());
        assert!(!range("[2.0,1.0]").matches_str("1.5"));
        assert!(range("(1.0,1.0]").is_degenerate());
        assert!(!range("(1.0,1.0]").matches_str("1.0"));
        assert!(!range("[1.0,1.0]").is_degenerate());
    }

    #[test]
    fn rejects_malformed_ranges() {
        assert!("[1.0,2.0".parse::<VersionRange>().is_err());
        assert!("(1.0)".parse::<VersionRange>().is_err());
        assert!("[1.0,2.0,3.0]".parse::<VersionRange>().is_err());
    }

    #[test]
    fn four_part_versions_keep_revision_as_build_metadata() {
        let version = parse_package_version("1.2.3.4").expect("four-part version should parse");
        assert_eq!(version.to_string(), "1.2.3+4");
        assert_eq!(
            parse_package_version("2").map(|v| v.to_string()),
            Some("2.0.0".to_string())
        );
    }
}
