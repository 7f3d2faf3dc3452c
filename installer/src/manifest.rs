//! `SHA256SUMS` manifest lookup and file checksum verification.
//!
//! Lines have the form `<64-hex> <name>` with an optional `*` binary marker
//! before the name. Names are compared by basename, so entries written as
//! `dist/asset.tar.gz` or `dist\asset.tar.gz` still match `asset.tar.gz`.

use crate::digest::{DigestError, Sha256Digest};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use thiserror::Error;

/// Errors arising from manifest lookup and checksum comparison.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest could not be read.
    #[error("failed to read checksum manifest {path}")]
    Read {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No usable candidate names were supplied.
    #[error("no valid asset names to look up")]
    NoCandidates,

    /// No manifest line names any candidate.
    #[error("checksum entry not found for {}", .candidates.join(" or "))]
    EntryNotFound {
        /// Normalized candidate names.
        candidates: Vec<String>,
    },

    /// The matching line's digest is not 64 hex characters.
    #[error("malformed digest for asset {asset}")]
    MalformedDigest {
        /// Matched asset name.
        asset: String,
        /// Digest validation failure.
        #[source]
        source: DigestError,
    },

    /// A file's digest differs from the manifest.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// File that was hashed.
        path: Utf8PathBuf,
        /// Digest from the manifest.
        expected: Sha256Digest,
        /// Digest of the file.
        actual: Sha256Digest,
    },

    /// The file could not be hashed.
    #[error(transparent)]
    Hash(DigestError),
}

/// Manifest entry chosen for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestMatch {
    /// Expected digest of the asset.
    pub digest: Sha256Digest,
    /// Candidate name that matched, as supplied by the caller.
    pub asset_name: String,
}

/// Look up the first manifest line naming any of `candidates`.
///
/// # Errors
///
/// Returns [`ManifestError::Read`] if the file cannot be read, otherwise as
/// [`find_entry`].
pub fn resolve(manifest: &Utf8Path, candidates: &[String]) -> Result<ManifestMatch, ManifestError> {
    let content = fs::read_to_string(manifest).map_err(|source| ManifestError::Read {
        path: manifest.to_owned(),
        source,
    })?;
    find_entry(&content, candidates)
}

/// Look up the first line of `content`, in file order, naming any candidate.
///
/// # Examples
///
/// ```
/// use shimfetch::manifest::find_entry;
///
/// let digest = "ab".repeat(32);
/// let content = format!("{digest}  *dist/shim.tar.gz\n");
/// let found = find_entry(&content, &["shim.tar.gz".to_owned()]).expect("entry");
/// assert_eq!(found.digest.as_str(), digest);
/// ```
///
/// # Errors
///
/// Returns [`ManifestError::NoCandidates`] when every candidate normalizes
/// to nothing, [`ManifestError::MalformedDigest`] when the matching line's
/// digest is invalid, and [`ManifestError::EntryNotFound`] when no line
/// matches.
pub fn find_entry(content: &str, candidates: &[String]) -> Result<ManifestMatch, ManifestError> {
    let wanted: Vec<(String, &String)> = candidates
        .iter()
        .filter_map(|candidate| normalize_asset_name(candidate).map(|name| (name, candidate)))
        .collect();
    if wanted.is_empty() {
        return Err(ManifestError::NoCandidates);
    }

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let (Some(digest), Some(raw_name)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some(name) = normalize_asset_name(raw_name) else {
            continue;
        };
        let Some((_, candidate)) = wanted.iter().find(|(wanted, _)| *wanted == name) else {
            continue;
        };
        let digest = Sha256Digest::parse(digest).map_err(|source| ManifestError::MalformedDigest {
            asset: name.clone(),
            source,
        })?;
        return Ok(ManifestMatch {
            digest,
            asset_name: (*candidate).clone(),
        });
    }
    Err(ManifestError::EntryNotFound {
        candidates: wanted.into_iter().map(|(name, _)| name).collect(),
    })
}

/// Normalize a manifest or candidate name to its basename.
///
/// Strips one leading `*` marker, treats `\` as a separator and ignores
/// trailing separators. Returns `None` for empty names and for `.` or `..`.
#[must_use]
pub fn normalize_asset_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let unmarked = trimmed.strip_prefix('*').unwrap_or(trimmed);
    let slashed = unmarked.replace('\\', "/");
    let base = slashed
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim();
    match base {
        "" | "." | ".." => None,
        name => Some(name.to_owned()),
    }
}

/// Check that the SHA-256 of `path` equals `expected`.
///
/// # Errors
///
/// Returns [`ManifestError::ChecksumMismatch`] on a difference and
/// [`ManifestError::Hash`] if the file cannot be read.
pub fn verify_file(path: &Utf8Path, expected: &Sha256Digest) -> Result<(), ManifestError> {
    let actual = Sha256Digest::of_file(path).map_err(ManifestError::Hash)?;
    if &actual != expected {
        return Err(ManifestError::ChecksumMismatch {
            path: path.to_owned(),
            expected: expected.clone(),
            actual,
        });
    }
    Ok(())
}
