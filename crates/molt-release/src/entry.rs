use std::fmt;
use std::io::Read;
use std::path::Path;

use crate::digest::sha1_reader;
use crate::error::ReleaseError;
use crate::version::ReleaseVersion;

pub const DELTA_SUFFIX: &str = "-delta.nupkg";
pub const FULL_SUFFIX: &str = "-full.nupkg";

/// One artifact listed in a `RELEASES` ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseEntry {
    sha1: String,
    filename: String,
    filesize: u64,
    is_delta: bool,
}

impl ReleaseEntry {
    pub fn new(
        sha1: impl Into<String>,
        filename: impl Into<String>,
        filesize: u64,
    ) -> Result<Self, ReleaseError> {
        let sha1 = sha1.into();
        let filename = filename.into();

        if sha1.len() != 40 || !sha1.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ReleaseError::invalid("sha1", sha1));
        }
        if filename.is_empty()
            || filename.contains(['/', '\\'])
            || filename.chars().any(char::is_whitespace)
        {
            return Err(ReleaseError::invalid("filename", filename));
        }
        if filesize == 0 {
            return Err(ReleaseError::invalid("filesize", "0"));
        }

        Ok(Self {
            is_delta: is_delta_filename(&filename),
            sha1,
            filename,
            filesize,
        })
    }

    #[must_use]
    pub fn sha1(&self) -> &str {
        &self.sha1
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    #[must_use]
    pub fn filesize(&self) -> u64 {
        self.filesize
    }

    #[must_use]
    pub fn is_delta(&self) -> bool {
        self.is_delta
    }

    /// Version derived from the filename, if it carries 2 to 4 numeric parts.
    #[must_use]
    pub fn version(&self) -> Option<ReleaseVersion> {
        ReleaseVersion::from_filename(&self.filename)
    }

    #[must_use]
    pub fn entry_as_string(&self) -> String {
        format!("{} {} {}", self.sha1, self.filename, self.filesize)
    }

    /// Parse one ledger line. Comments (`#` to end of line) are stripped
    /// first; a line with nothing left yields `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, ReleaseError> {
        let content = line.split_once('#').map_or(line, |(before, _)| before);
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }

        let malformed = || ReleaseError::MalformedEntry {
            line: line.trim_end().to_string(),
        };

        let mut fields = content.split_whitespace();
        let (Some(sha1), Some(filename), Some(size), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed());
        };

        if sha1.len() != 40 || !sha1.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed());
        }
        if !size.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let size = size.parse::<u64>().map_err(|_| malformed())?;

        Self::new(sha1, filename, size)
            .map(Some)
            .map_err(|_| malformed())
    }

    pub fn generate_from_reader(reader: impl Read, filename: &str) -> Result<Self, ReleaseError> {
        let (sha1, size) = sha1_reader(reader)
            .map_err(|error| ReleaseError::io("failed to hash release", Path::new(filename), error))?;
        Self::new(sha1, filename, size)
    }

    pub fn generate_from_file(path: &Path) -> Result<Self, ReleaseError> {
        let filename = path
            .file_name()
            .and_then(std::ffi::OsStr::to_str)
            .ok_or_else(|| ReleaseError::invalid("filename", path.display().to_string()))?;
        let file = std::fs::File::open(path)
            .map_err(|error| ReleaseError::io("failed to open release", path, error))?;
        let (sha1, size) = sha1_reader(file)
            .map_err(|error| ReleaseError::io("failed to hash release", path, error))?;
        Self::new(sha1, filename, size)
    }
}

impl fmt::Display for ReleaseEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.sha1, self.filename, self.filesize)
    }
}

/// Whether `filename` carries the reserved delta suffix (case-insensitive).
#[must_use]
pub fn is_delta_filename(filename: &str) -> bool {
    filename.len() >= DELTA_SUFFIX.len()
        && filename
            .get(filename.len() - DELTA_SUFFIX.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(DELTA_SUFFIX))
}
