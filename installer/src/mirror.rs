//! Release mirror validation and ordering.

use crate::version::ReleaseVersion;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Errors arising from mirror validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorError {
    /// Every candidate was invalid or the list was empty.
    #[error("no valid https mirrors configured ({rejected} candidate(s) rejected)")]
    NoneValid {
        /// How many candidates were dropped.
        rejected: usize,
    },
}

/// Why a single mirror candidate was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorRejection {
    /// The candidate was blank.
    #[error("empty mirror URL")]
    Empty,
    /// The candidate is not an absolute URL.
    #[error("not an absolute URL: {0}")]
    Parse(#[from] url::ParseError),
    /// The scheme is not `https`.
    #[error("scheme {0:?} is not https")]
    Scheme(String),
    /// The URL has no host.
    #[error("missing host")]
    MissingHost,
    /// The URL carries a username or password.
    #[error("embedded credentials are not allowed")]
    Credentials,
}

/// A validated `https` release base URL without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mirror(String);

impl Mirror {
    /// Validate one candidate base URL.
    ///
    /// # Errors
    ///
    /// Returns a [`MirrorRejection`] describing the first failed check.
    pub fn parse(candidate: &str) -> Result<Self, MirrorRejection> {
        let trimmed = candidate.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(MirrorRejection::Empty);
        }
        let url = Url::parse(trimmed)?;
        // `Url` lowercases the scheme, so `HTTPS://` passes here.
        if url.scheme() != "https" {
            return Err(MirrorRejection::Scheme(url.scheme().to_owned()));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(MirrorRejection::MissingHost);
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(MirrorRejection::Credentials);
        }
        Ok(Self(url.as_str().trim_end_matches('/').to_owned()))
    }

    /// Return the base URL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build `<mirror>/<version>/<asset>`.
    ///
    /// # Errors
    ///
    /// Returns [`url::ParseError`] if the joined URL does not parse, which
    /// only happens for asset names containing URL syntax.
    pub fn asset_url(&self, version: &ReleaseVersion, asset: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}/{}/{asset}", self.0, version.as_str()))
    }
}

impl fmt::Display for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, de-duplicated list of valid mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRegistry {
    mirrors: Vec<Mirror>,
}

impl MirrorRegistry {
    /// Validate candidates in order, dropping invalid ones with a warning.
    ///
    /// # Examples
    ///
    /// ```
    /// use shimfetch::mirror::MirrorRegistry;
    ///
    /// let registry = MirrorRegistry::from_candidates([
    ///     "https://a.example/releases/",
    ///     "http://insecure.example",
    ///     "https://a.example/releases",
    /// ])
    /// .expect("one valid mirror");
    /// assert_eq!(registry.mirrors().len(), 1);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::NoneValid`] when no candidate survives.
    pub fn from_candidates<I, S>(candidates: I) -> Result<Self, MirrorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mirrors: Vec<Mirror> = Vec::new();
        let mut rejected = 0;
        for candidate in candidates {
            let candidate = candidate.as_ref();
            match Mirror::parse(candidate) {
                Ok(mirror) if mirrors.contains(&mirror) => {}
                Ok(mirror) => mirrors.push(mirror),
                Err(reason) => {
                    rejected += 1;
                    log::warn!("ignoring mirror {candidate:?}: {reason}");
                }
            }
        }
        if mirrors.is_empty() {
            return Err(MirrorError::NoneValid { rejected });
        }
        Ok(Self { mirrors })
    }

    /// The mirrors in preference order.
    #[must_use]
    pub fn mirrors(&self) -> &[Mirror] {
        &self.mirrors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::VersionOrigin;
    use rstest::rstest;

    #[rstest]
    #[case::plain("https://releases.example.com", "https://releases.example.com")]
    #[case::trailing_slash("https://releases.example.com/x/", "https://releases.example.com/x")]
    #[case::whitespace("  https://releases.example.com/x  ", "https://releases.example.com/x")]
    #[case::upper_scheme("HTTPS://releases.example.com/x", "https://releases.example.com/x")]
    fn accepts_https_candidates(#[case] candidate: &str, #[case] expected: &str) {
        let mirror = Mirror::parse(candidate).expect("valid mirror");
        assert_eq!(mirror.as_str(), expected);
    }

    #[rstest]
    #[case::empty("   ", MirrorRejection::Empty)]
    #[case::http("http://releases.example.com", MirrorRejection::Scheme("http".to_owned()))]
    #[case::ftp("ftp://releases.example.com", MirrorRejection::Scheme("ftp".to_owned()))]
    #[case::user("https://user@releases.example.com", MirrorRejection::Credentials)]
    #[case::password("https://user:pw@releases.example.com", MirrorRejection::Credentials)]
    fn rejects_invalid_candidates(#[case] candidate: &str, #[case] expected: MirrorRejection) {
        assert_eq!(Mirror::parse(candidate), Err(expected));
    }

    #[test]
    fn relative_url_is_rejected() {
        assert!(matches!(
            Mirror::parse("/releases"),
            Err(MirrorRejection::Parse(_))
        ));
    }

    #[test]
    fn registry_keeps_order_and_drops_duplicates() {
        let registry = MirrorRegistry::from_candidates([
            "https://b.example",
            "https://a.example/",
            "http://c.example",
            "https://b.example/",
        ])
        .expect("valid registry");
        let urls: Vec<&str> = registry.mirrors().iter().map(Mirror::as_str).collect();
        assert_eq!(urls, ["https://b.example", "https://a.example"]);
    }

    #[test]
    fn registry_without_valid_mirrors_fails() {
        let err = MirrorRegistry::from_candidates(["http://a.example", ""])
            .expect_err("expected failure");
        assert_eq!(err, MirrorError::NoneValid { rejected: 2 });
    }

    #[test]
    fn asset_url_joins_version_and_asset() {
        let mirror = Mirror::parse("https://releases.example.com/shim").expect("valid");
        let version = ReleaseVersion::normalize("1.2.3", VersionOrigin::Explicit)
            .expect("valid")
            .expect("set");
        let url = mirror.asset_url(&version, "SHA256SUMS").expect("url");
        assert_eq!(
            url.as_str(),
            "https://releases.example.com/shim/v1.2.3/SHA256SUMS"
        );
    }
}
