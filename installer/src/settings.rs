//! Tunable settings for release lookup and downloads.
//!
//! Every field has a default matching the published release layout, so an
//! empty TOML document yields a working configuration. Durations are stored
//! as integer seconds or milliseconds and exposed as [`Duration`] accessors.

use camino::Utf8Path;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_VERSION: &str = "v0.3.1";
const PRIMARY_MIRROR: &str = "https://releases.amikos.tech/chroma-go-local";
const FALLBACK_MIRROR: &str = "https://github.com/amikos-tech/chroma-go-local/releases/download";
const ARCHIVE_PREFIX: &str = "chroma-go-local";
const IDENTITY_TEMPLATE: &str =
    "https://github.com/amikos-tech/chroma-go-local/.github/workflows/release.yml@refs/tags/{version}";
const OIDC_ISSUER: &str = "https://token.actions.githubusercontent.com";
/// Longest accepted duration setting: one day.
const MAX_DURATION_SECS: u64 = 24 * 60 * 60;

/// Errors arising from loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings file {path}")]
    Read {
        /// Path to the settings file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML document is malformed or has unknown keys.
    #[error("failed to parse settings")]
    Parse(#[from] toml::de::Error),

    /// A field holds a value that would disable a safety bound.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// Dotted field name, e.g. `download.attempts`.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

/// Top-level settings document.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Where releases live and how they are signed.
    pub release: ReleaseSettings,
    /// Network and lock bounds.
    pub download: DownloadSettings,
}

impl Settings {
    /// Parse and validate settings from a TOML string.
    ///
    /// # Examples
    ///
    /// ```
    /// use shimfetch::settings::Settings;
    ///
    /// let settings = Settings::from_toml_str("[download]\nattempts = 5\n")
    ///     .expect("valid settings");
    /// assert_eq!(settings.download.attempts, 5);
    /// assert_eq!(settings.release.default_version, "v0.3.1");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Parse`] for malformed TOML and
    /// [`SettingsError::Invalid`] for values that fail validation.
    pub fn from_toml_str(source: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(source)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read, parse and validate a TOML settings file.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Read`] if the file cannot be read, otherwise
    /// as [`Self::from_toml_str`].
    pub fn load(path: &Utf8Path) -> Result<Self, SettingsError> {
        let source = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Reject values that would remove a safety bound.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let download = &self.download;
        let checks: [(&'static str, bool); 8] = [
            ("download.attempts", download.attempts == 0),
            ("download.timeout_secs", download.timeout_secs == 0),
            ("download.max_artifact_bytes", download.max_artifact_bytes == 0),
            ("download.max_metadata_bytes", download.max_metadata_bytes == 0),
            ("download.lock_wait_secs", download.lock_wait_secs == 0),
            ("download.lock_stale_secs", download.lock_stale_secs == 0),
            ("download.heartbeat_secs", download.heartbeat_secs == 0),
            ("download.lock_poll_ms", download.lock_poll_ms == 0),
        ];
        if let Some((field, _)) = checks.into_iter().find(|&(_, is_zero)| is_zero) {
            return Err(SettingsError::Invalid {
                field,
                reason: "must be greater than zero",
            });
        }
        let durations: [(&'static str, Duration); 6] = [
            ("download.backoff_ms", download.backoff()),
            ("download.timeout_secs", download.timeout()),
            ("download.lock_wait_secs", download.lock_wait()),
            ("download.lock_stale_secs", download.lock_stale()),
            ("download.heartbeat_secs", download.heartbeat()),
            ("download.lock_poll_ms", download.lock_poll()),
        ];
        let limit = Duration::from_secs(MAX_DURATION_SECS);
        if let Some((field, _)) = durations.into_iter().find(|&(_, value)| value > limit) {
            return Err(SettingsError::Invalid {
                field,
                reason: "must not exceed one day",
            });
        }
        if download.heartbeat_secs >= download.lock_stale_secs {
            return Err(SettingsError::Invalid {
                field: "download.heartbeat_secs",
                reason: "must be shorter than download.lock_stale_secs",
            });
        }
        if !self.release.identity_template.contains("{version}") {
            return Err(SettingsError::Invalid {
                field: "release.identity_template",
                reason: "must contain a {version} placeholder",
            });
        }
        Ok(())
    }
}

/// Release hosting and signing identity.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ReleaseSettings {
    /// Version used when neither an override nor build metadata supplies one.
    pub default_version: String,
    /// Candidate base URLs in preference order.
    pub mirrors: Vec<String>,
    /// Archive name prefix, as in `<prefix>-<version>-<platform>.tar.gz`.
    pub archive_prefix: String,
    /// Expected certificate URI SAN with a `{version}` placeholder.
    pub identity_template: String,
    /// Expected OIDC issuer recorded in the certificate.
    pub oidc_issuer: String,
}

impl ReleaseSettings {
    /// Expected certificate identity for a release tag.
    #[must_use]
    pub fn expected_identity(&self, version: &str) -> String {
        self.identity_template.replace("{version}", version)
    }
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            default_version: DEFAULT_VERSION.to_owned(),
            mirrors: vec![PRIMARY_MIRROR.to_owned(), FALLBACK_MIRROR.to_owned()],
            archive_prefix: ARCHIVE_PREFIX.to_owned(),
            identity_template: IDENTITY_TEMPLATE.to_owned(),
            oidc_issuer: OIDC_ISSUER.to_owned(),
        }
    }
}

/// Retry, size, redirect and lock bounds.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadSettings {
    /// Attempts per asset per mirror.
    pub attempts: u32,
    /// Linear backoff step between attempts, in milliseconds.
    pub backoff_ms: u64,
    /// Wall-clock limit for a single request, in seconds.
    pub timeout_secs: u64,
    /// Ceiling for the archive and the extracted library, in bytes.
    pub max_artifact_bytes: u64,
    /// Ceiling for `SHA256SUMS` and its signature and certificate, in bytes.
    pub max_metadata_bytes: u64,
    /// Maximum redirect hops per request.
    pub max_redirects: u32,
    /// How long to wait for the download lock, in seconds.
    pub lock_wait_secs: u64,
    /// Age after which an unrefreshed lock may be evicted, in seconds.
    pub lock_stale_secs: u64,
    /// Lock refresh interval, in seconds.
    pub heartbeat_secs: u64,
    /// Delay between lock acquisition attempts, in milliseconds.
    pub lock_poll_ms: u64,
}

impl DownloadSettings {
    /// Backoff step as a [`Duration`].
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Lock wait as a [`Duration`].
    #[must_use]
    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    /// Stale threshold as a [`Duration`].
    #[must_use]
    pub fn lock_stale(&self) -> Duration {
        Duration::from_secs(self.lock_stale_secs)
    }

    /// Heartbeat interval as a [`Duration`].
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Lock poll interval as a [`Duration`].
    #[must_use]
    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms)
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 1_000,
            timeout_secs: 600,
            max_artifact_bytes: 500 * 1024 * 1024,
            max_metadata_bytes: 1024 * 1024,
            max_redirects: 10,
            lock_wait_secs: 45,
            lock_stale_secs: 600,
            heartbeat_secs: 30,
            lock_poll_ms: 500,
        }
    }
}
