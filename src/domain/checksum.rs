use std::{
    fmt::Display,
    fs::File,
    io::{self, Read},
    path::Path,
    str::FromStr,
};

use anyhow::bail;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Size of the buffer file contents are hashed through.
pub const CHUNK_SIZE: usize = 4096;

/// Computes the md5 checksum of a file, reading it in fixed-size chunks.
///
/// Returns the 32 character lowercase hex digest.
/// A missing or unreadable file is an error for the caller to handle.
pub fn md5(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn md5_bytes(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// A validated md5 hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    pub fn of_file(path: &Path) -> io::Result<Self> {
        Ok(Self(md5(path)?))
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(md5_bytes(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares against a digest as written in a manifest, ignoring case.
    pub fn matches(&self, expected: &str) -> bool {
        self.0.eq_ignore_ascii_case(expected)
    }
}

impl FromStr for Checksum {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        if s.len() != 32 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("'{s}' is not an md5 hex digest");
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for Checksum {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        s.parse()
    }
}

impl From<Checksum> for String {
    fn from(c: Checksum) -> String {
        c.0
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
