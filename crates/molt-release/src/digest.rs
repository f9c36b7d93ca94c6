use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};

/// Uppercase hex SHA-1 of everything `reader` yields, plus its length.
pub fn sha1_reader(mut reader: impl Read) -> std::io::Result<(String, u64)> {
    let mut hasher = Sha1::new();
    let mut buffer = [0_u8; 8192];
    let mut total = 0_u64;

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    Ok((format!("{:X}", hasher.finalize()), total))
}

pub fn sha1_file(path: &Path) -> std::io::Result<(String, u64)> {
    sha1_reader(std::fs::File::open(path)?)
}

#[must_use]
pub fn sha1_bytes(data: &[u8]) -> String {
    format!("{:X}", Sha1::digest(data))
}

/// Digests are compared case-insensitively.
#[must_use]
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.eq_ignore_ascii_case(actual)
}
