//! SHA-256 digest newtype for archive verification.
//!
//! Accepts a 64-character hexadecimal string in either case and stores it in
//! lowercase so comparisons against computed digests are exact.

use camino::Utf8Path;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Read;
use thiserror::Error;

/// Expected length of a hex-encoded SHA-256 digest.
const DIGEST_HEX_LEN: usize = 64;

/// Errors arising from digest parsing or computation.
#[derive(Debug, Error)]
pub enum DigestError {
    /// The value is not a 64-character hex string.
    #[error("malformed digest {value:?}: {reason}")]
    Malformed {
        /// The rejected value.
        value: String,
        /// Description of the validation failure.
        reason: String,
    },

    /// The file could not be read while hashing.
    #[error("failed to hash {path}")]
    Read {
        /// File being hashed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A validated, lowercase hex-encoded SHA-256 digest.
///
/// # Examples
///
/// ```
/// use shimfetch::digest::Sha256Digest;
///
/// let digest = Sha256Digest::parse(&"AB".repeat(32)).expect("valid digest");
/// assert_eq!(digest.as_str(), "ab".repeat(32));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Parse a hex digest, accepting upper- or lowercase characters.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Malformed`] unless `value` is exactly 64 hex
    /// characters.
    pub fn parse(value: &str) -> Result<Self, DigestError> {
        if value.len() != DIGEST_HEX_LEN {
            return Err(DigestError::Malformed {
                value: value.to_owned(),
                reason: format!(
                    "expected {DIGEST_HEX_LEN} hex characters, got {}",
                    value.len()
                ),
            });
        }
        if let Some(bad) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(DigestError::Malformed {
                value: value.to_owned(),
                reason: format!("non-hex character '{bad}'"),
            });
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Digest of an in-memory byte slice.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Stream a file through SHA-256.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Read`] if the file cannot be opened or read.
    pub fn of_file(path: &Utf8Path) -> Result<Self, DigestError> {
        let read_error = |source| DigestError::Read {
            path: path.to_string(),
            source,
        };
        let mut file = fs::File::open(path).map_err(read_error)?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        loop {
            let bytes_read = file.read(&mut buffer).map_err(read_error)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    /// Return the digest as a hex string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
