//! Platform allow-list for the runtime shim.
//!
//! Only the three release platforms are accepted. Any other (OS, architecture)
//! pair is rejected when the target is constructed, before any download.

use crate::version::ReleaseVersion;
use std::fmt;
use thiserror::Error;

/// Supported platforms as (platform id, library file name).
const SUPPORTED_PLATFORMS: &[(&str, &str)] = &[
    ("linux-amd64", "libchroma_shim.so"),
    ("darwin-arm64", "libchroma_shim.dylib"),
    ("windows-amd64", "chroma_shim.dll"),
];

/// Errors arising from platform detection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The (OS, architecture) pair has no published shim build.
    #[error("unsupported platform {os}/{arch} (supported: {expected})")]
    Unsupported {
        /// Operating system as supplied.
        os: String,
        /// Architecture as supplied.
        arch: String,
        /// Comma-separated supported platform ids.
        expected: String,
    },
}

/// A validated release platform.
///
/// # Examples
///
/// ```
/// use shimfetch::platform::PlatformTarget;
///
/// let target = PlatformTarget::new("linux", "x86_64").expect("supported");
/// assert_eq!(target.platform_id(), "linux-amd64");
/// assert_eq!(target.library_file_name(), "libchroma_shim.so");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatformTarget {
    platform_id: &'static str,
    library_file_name: &'static str,
}

impl PlatformTarget {
    /// Validate an (OS, architecture) pair.
    ///
    /// Both release-style names (`darwin`, `amd64`) and Rust's `std::env::consts`
    /// names (`macos`, `x86_64`, `aarch64`) are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Unsupported`] for any pair outside the
    /// allow-list.
    pub fn new(os: &str, arch: &str) -> Result<Self, PlatformError> {
        let id = format!("{}-{}", canonical_os(os), canonical_arch(arch));
        SUPPORTED_PLATFORMS
            .iter()
            .find(|(platform_id, _)| *platform_id == id)
            .map(|&(platform_id, library_file_name)| Self {
                platform_id,
                library_file_name,
            })
            .ok_or_else(|| PlatformError::Unsupported {
                os: os.to_owned(),
                arch: arch.to_owned(),
                expected: Self::supported().collect::<Vec<_>>().join(", "),
            })
    }

    /// Detect the platform this binary was compiled for.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Unsupported`] on hosts without a shim build.
    pub fn current() -> Result<Self, PlatformError> {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Iterate the supported platform ids.
    pub fn supported() -> impl Iterator<Item = &'static str> {
        SUPPORTED_PLATFORMS.iter().map(|(id, _)| *id)
    }

    /// Platform id used in archive names and cache paths.
    #[must_use]
    pub fn platform_id(&self) -> &'static str {
        self.platform_id
    }

    /// File name of the shared library inside the archive.
    #[must_use]
    pub fn library_file_name(&self) -> &'static str {
        self.library_file_name
    }

    /// Archive asset name for `version`, e.g.
    /// `chroma-go-local-v0.3.1-linux-amd64.tar.gz`.
    #[must_use]
    pub fn archive_name(&self, prefix: &str, version: &str) -> String {
        format!("{prefix}-{version}-{}.tar.gz", self.platform_id)
    }

    /// Candidate archive names in preference order: the normalized tag
    /// first, then the tag without its `v` prefix.
    #[must_use]
    pub fn archive_candidates(&self, prefix: &str, version: &ReleaseVersion) -> Vec<String> {
        let mut candidates = vec![self.archive_name(prefix, version.as_str())];
        let bare = self.archive_name(prefix, version.bare());
        if !candidates.contains(&bare) {
            candidates.push(bare);
        }
        candidates
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.platform_id)
    }
}

fn canonical_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn canonical_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}
