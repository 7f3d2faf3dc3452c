//! Release version normalization and selection.
//!
//! A release tag flows into both cache paths and mirror URLs, so every value
//! is checked against a conservative character set before use. Selection
//! follows the precedence explicit override, then build metadata, then the
//! configured default.

use std::fmt;
use thiserror::Error;

/// Placeholder version reported for unreleased (workspace) builds.
const DEVEL_PLACEHOLDER: &str = "(devel)";

/// Compile-time version pin for the runtime shim, if the build provided one.
const COMPILED_RUNTIME_VERSION: Option<&str> = option_env!("SHIMFETCH_RUNTIME_VERSION");

/// Where a candidate version value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrigin {
    /// Supplied explicitly by the caller.
    Explicit,
    /// Detected from build metadata.
    Detected,
    /// Taken from the configured default.
    Default,
}

impl fmt::Display for VersionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit => f.write_str("explicit"),
            Self::Detected => f.write_str("detected"),
            Self::Default => f.write_str("default"),
        }
    }
}

/// Errors arising from version validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// The value contains characters outside `[A-Za-z0-9._-]`.
    #[error(
        "invalid {origin} library version {value:?}: only ASCII letters, digits, '.', '_' and '-' are allowed"
    )]
    InvalidCharacters {
        /// Which precedence level supplied the value.
        origin: VersionOrigin,
        /// The rejected value.
        value: String,
    },

    /// Every precedence level was unset, including the default.
    #[error("no library version configured")]
    Unset,
}

/// A normalized release tag such as `v0.3.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseVersion(String);

impl ReleaseVersion {
    /// Normalize a raw tag.
    ///
    /// Returns `Ok(None)` for the unset sentinels (blank or `(devel)`), so
    /// callers fall through to the next precedence level. A missing `v`
    /// prefix is added.
    ///
    /// # Examples
    ///
    /// ```
    /// use shimfetch::version::{ReleaseVersion, VersionOrigin};
    ///
    /// let version = ReleaseVersion::normalize("0.2.0", VersionOrigin::Explicit)
    ///     .expect("valid tag")
    ///     .expect("set");
    /// assert_eq!(version.as_str(), "v0.2.0");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::InvalidCharacters`] when the trimmed value
    /// contains a disallowed character.
    pub fn normalize(raw: &str, origin: VersionOrigin) -> Result<Option<Self>, VersionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == DEVEL_PLACEHOLDER {
            return Ok(None);
        }
        if !trimmed.chars().all(is_tag_char) {
            return Err(VersionError::InvalidCharacters {
                origin,
                value: trimmed.to_owned(),
            });
        }
        if trimmed.starts_with('v') {
            Ok(Some(Self(trimmed.to_owned())))
        } else {
            Ok(Some(Self(format!("v{trimmed}"))))
        }
    }

    /// Return the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the tag with its leading `v` removed.
    #[must_use]
    pub fn bare(&self) -> &str {
        self.0.strip_prefix('v').unwrap_or(&self.0)
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Source of a version detected from build metadata.
#[cfg_attr(test, mockall::automock)]
pub trait VersionSource: Send + Sync {
    /// Return the detected raw version, if any.
    fn detect(&self) -> Option<String>;
}

/// Reads the `SHIMFETCH_RUNTIME_VERSION` value captured at compile time.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompiledVersionSource;

impl VersionSource for CompiledVersionSource {
    fn detect(&self) -> Option<String> {
        COMPILED_RUNTIME_VERSION.map(str::to_owned)
    }
}

/// Select the release version by precedence.
///
/// # Errors
///
/// Returns [`VersionError::InvalidCharacters`] if any consulted value fails
/// the character check, and [`VersionError::Unset`] if all levels are unset.
pub fn resolve_version(
    explicit: Option<&str>,
    source: &dyn VersionSource,
    default: &str,
) -> Result<ReleaseVersion, VersionError> {
    if let Some(version) = explicit
        .map(|raw| ReleaseVersion::normalize(raw, VersionOrigin::Explicit))
        .transpose()?
        .flatten()
    {
        return Ok(version);
    }
    if let Some(version) = source
        .detect()
        .map(|raw| ReleaseVersion::normalize(&raw, VersionOrigin::Detected))
        .transpose()?
        .flatten()
    {
        log::debug!("using library version {version} from build metadata");
        return Ok(version);
    }
    ReleaseVersion::normalize(default, VersionOrigin::Default)?.ok_or(VersionError::Unset)
}
