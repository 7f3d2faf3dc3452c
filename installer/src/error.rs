//! Top-level error type for library acquisition.
//!
//! Each component reports its own error enum; [`ShimError`] wraps them with
//! the operation that failed and classifies the result through
//! [`ErrorKind`] so callers can tell a misconfiguration from a transient
//! network failure or a provenance rejection.

use crate::cache::CacheError;
use crate::extract::ExtractionError;
use crate::fetch::FetchError;
use crate::lock::LockError;
use crate::manifest::ManifestError;
use crate::mirror::MirrorError;
use crate::platform::PlatformError;
use crate::provenance::ProvenanceError;
use crate::settings::SettingsError;
use crate::version::VersionError;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Broad failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid or missing configuration.
    Configuration,
    /// No usable mirror.
    Mirror,
    /// Download failures.
    Network,
    /// Lock acquisition or release failures.
    Lock,
    /// Checksum, archive or install verification failures.
    Integrity,
    /// Certificate or signature rejection.
    Provenance,
    /// Other local filesystem failures.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::Mirror => "mirror",
            Self::Network => "network",
            Self::Lock => "lock",
            Self::Integrity => "integrity",
            Self::Provenance => "provenance",
            Self::Io => "io",
        };
        f.write_str(name)
    }
}

/// Errors returned while resolving or acquiring the runtime library.
#[derive(Debug, Error)]
pub enum ShimError {
    /// No path was supplied and automatic download is disabled.
    #[error("no library path configured and automatic download is disabled")]
    NotConfigured,

    /// The selected version failed validation.
    #[error("invalid library version")]
    InvalidVersion(#[source] VersionError),

    /// The running platform has no published library.
    #[error("cannot select a library for this platform")]
    UnsupportedPlatform(#[source] PlatformError),

    /// Settings could not be loaded or are invalid.
    #[error("invalid settings")]
    Settings(#[source] SettingsError),

    /// No mirror survived validation.
    #[error("no release mirror available")]
    NoMirrors(#[source] MirrorError),

    /// Cache layout or install failure.
    #[error("cache operation failed")]
    Cache(#[source] CacheError),

    /// Download of a release asset failed.
    #[error("failed to download {asset} from {mirror}")]
    Network {
        /// Asset name.
        asset: String,
        /// Mirror base URL.
        mirror: String,
        /// Underlying fetch error.
        #[source]
        source: Box<FetchError>,
    },

    /// Every mirror failed with a network error.
    #[error("all mirrors failed: {}", render_failures(.failures))]
    MirrorsExhausted {
        /// Per-mirror failures, in mirror order.
        failures: Vec<ShimError>,
    },

    /// The download lock could not be acquired or released.
    #[error("download lock failed")]
    Lock(#[source] LockError),

    /// A checksum lookup or comparison failed.
    #[error("{context}")]
    Checksum {
        /// Operation that failed.
        context: String,
        /// Underlying manifest error.
        #[source]
        source: ManifestError,
    },

    /// Archive extraction failed.
    #[error("failed to extract {entry}")]
    Extraction {
        /// Entry being extracted.
        entry: String,
        /// Underlying extraction error.
        #[source]
        source: ExtractionError,
    },

    /// The signed manifest was rejected.
    #[error("provenance verification failed for {mirror}")]
    Provenance {
        /// Mirror that served the manifest.
        mirror: String,
        /// Underlying verification error.
        #[source]
        source: ProvenanceError,
    },

    /// A local filesystem operation failed.
    #[error("{context}")]
    Io {
        /// Operation that failed.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The acquisition failed and the download lock could not be released
    /// afterwards.
    #[error("{}; download lock also not released: {}", error_chain(.failure.as_ref()), error_chain(.release))]
    LockNotReleased {
        /// The acquisition failure.
        failure: Box<ShimError>,
        /// The release failure.
        release: LockError,
    },

    /// Outermost wrapper applied by path resolution.
    #[error("could not resolve library path")]
    Resolve(#[source] Box<ShimError>),
}

impl ShimError {
    /// The failure class of this error, looking through the resolution
    /// wrapper.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConfigured
            | Self::InvalidVersion(_)
            | Self::UnsupportedPlatform(_)
            | Self::Settings(_) => ErrorKind::Configuration,
            Self::Cache(CacheError::HomeUnavailable | CacheError::NonUtf8Home { .. }) => {
                ErrorKind::Configuration
            }
            Self::Cache(CacheError::InstallVerification { .. }) => ErrorKind::Integrity,
            Self::Cache(_) | Self::Io { .. } => ErrorKind::Io,
            Self::NoMirrors(_) => ErrorKind::Mirror,
            Self::Network { .. } | Self::MirrorsExhausted { .. } => ErrorKind::Network,
            Self::Lock(_) => ErrorKind::Lock,
            Self::Checksum { source, .. } => match source {
                ManifestError::Read { .. } => ErrorKind::Io,
                _ => ErrorKind::Integrity,
            },
            Self::Extraction { source, .. } => {
                if source.is_integrity() {
                    ErrorKind::Integrity
                } else {
                    ErrorKind::Io
                }
            }
            Self::Provenance { .. } => ErrorKind::Provenance,
            Self::LockNotReleased { failure, .. } => failure.kind(),
            Self::Resolve(inner) => inner.kind(),
        }
    }

    /// Render this error and every `source()` beneath it, joined by `": "`.
    #[must_use]
    pub fn error_chain(&self) -> String {
        error_chain(self)
    }
}

/// Render `err` and its `source()` chain joined by `": "`.
#[must_use]
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        current = cause.source();
    }
    rendered
}

fn render_failures(failures: &[ShimError]) -> String {
    failures
        .iter()
        .map(|failure| format!("[{}]", failure.error_chain()))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<VersionError> for ShimError {
    fn from(err: VersionError) -> Self {
        Self::InvalidVersion(err)
    }
}

impl From<PlatformError> for ShimError {
    fn from(err: PlatformError) -> Self {
        Self::UnsupportedPlatform(err)
    }
}

impl From<SettingsError> for ShimError {
    fn from(err: SettingsError) -> Self {
        Self::Settings(err)
    }
}

impl From<MirrorError> for ShimError {
    fn from(err: MirrorError) -> Self {
        Self::NoMirrors(err)
    }
}

impl From<CacheError> for ShimError {
    fn from(err: CacheError) -> Self {
        Self::Cache(err)
    }
}

impl From<LockError> for ShimError {
    fn from(err: LockError) -> Self {
        Self::Lock(err)
    }
}

/// Result alias for library acquisition.
pub type Result<T> = std::result::Result<T, ShimError>;
