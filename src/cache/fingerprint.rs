//! Content fingerprints for cache keys
//!
//! A fingerprint is the first 16 hex characters (64 bits) of the SHA-256 of
//! an input's bytes. Truncation keeps keys short in the store and in log
//! lines. The price is a birthday bound of roughly 2^32 distinct inputs per
//! store before a collision becomes likely; that residual risk is accepted.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Number of hex characters kept from the SHA-256 digest
pub const FINGERPRINT_HEX_LEN: usize = 16;

const READ_CHUNK_BYTES: usize = 8192;

#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("Failed to read input {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read input stream: {0}")]
    Stream(#[source] io::Error),

    #[error("Invalid fingerprint '{0}': expected {FINGERPRINT_HEX_LEN} lowercase hex characters")]
    Invalid(String),
}

/// Stable identifier derived from input content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self::from_digest(hasher)
    }

    /// Fingerprint a stream, reading it to the end
    ///
    /// A read error aborts hashing; no fingerprint is produced for a
    /// partially consumed stream.
    pub fn of_reader<R: Read>(mut reader: R) -> Result<Self, FingerprintError> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; READ_CHUNK_BYTES];

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FingerprintError::Stream(e)),
            };
            hasher.update(&buf[..n]);
        }

        Ok(Self::from_digest(hasher))
    }

    /// Fingerprint the contents of a file
    pub fn of_file<P: AsRef<Path>>(path: P) -> Result<Self, FingerprintError> {
        let path = path.as_ref();
        let unreadable = |source| FingerprintError::Unreadable {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(unreadable)?;
        Self::of_reader(file).map_err(|e| match e {
            FingerprintError::Stream(source) => unreadable(source),
            other => other,
        })
    }

    /// Validate an externally supplied fingerprint string
    pub fn parse(value: &str) -> Result<Self, FingerprintError> {
        let valid = value.len() == FINGERPRINT_HEX_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));

        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(FingerprintError::Invalid(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_digest(hasher: Sha256) -> Self {
        let hash = hex::encode(hasher.finalize());
        Self(hash[..FINGERPRINT_HEX_LEN].to_string())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = FingerprintError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}
