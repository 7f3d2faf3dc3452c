//! Provenance verification of the signed checksum manifest.
//!
//! A release publishes `SHA256SUMS`, a detached signature over it and the
//! short-lived code-signing certificate that made the signature. The
//! verifier checks, in order, that the certificate decodes, is already
//! valid, carries the code-signing usage, names the release workflow as its
//! identity and the expected OIDC issuer, and finally that the signature
//! verifies against the certificate's key. The first failed check aborts.
//!
//! Certificate expiry is not checked. Signing certificates live for minutes,
//! so any download after that window would otherwise fail.

mod certificate;
mod error;
mod signature;

pub use certificate::{ProvenanceCertificate, PublicKeyMaterial, decode_der_string};
pub use error::ProvenanceError;
pub use signature::verify_signature;

use crate::context::Clock;
use crate::settings::ReleaseSettings;
use crate::version::ReleaseVersion;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Certificate extension carrying the OIDC issuer of the signing identity.
pub const OIDC_ISSUER_OID: &str = "1.3.6.1.4.1.57264.1.1";

/// Verifies a signed manifest before its digests are trusted.
#[cfg_attr(test, mockall::automock)]
pub trait ManifestVerifier: Send + Sync {
    /// Verify `signature` and `certificate` over `manifest` for `version`.
    ///
    /// # Errors
    ///
    /// Returns the [`ProvenanceError`] of the first failed check.
    fn verify(
        &self,
        version: &ReleaseVersion,
        manifest: &[u8],
        signature: &[u8],
        certificate: &[u8],
    ) -> Result<(), ProvenanceError>;
}

/// Expected signer of release manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenancePolicy {
    /// Certificate URI SAN with a `{version}` placeholder.
    pub identity_template: String,
    /// Required OIDC issuer value.
    pub oidc_issuer: String,
}

impl ProvenancePolicy {
    /// Identity expected for `version`.
    #[must_use]
    pub fn expected_identity(&self, version: &ReleaseVersion) -> String {
        self.identity_template.replace("{version}", version.as_str())
    }

    /// Run the certificate checks against a decoded certificate.
    ///
    /// # Errors
    ///
    /// Returns the [`ProvenanceError`] of the first failed check.
    pub fn check_certificate(
        &self,
        certificate: &ProvenanceCertificate,
        version: &ReleaseVersion,
        now: SystemTime,
    ) -> Result<(), ProvenanceError> {
        let now = unix_seconds(now);
        if now < certificate.not_before {
            return Err(ProvenanceError::NotYetValid {
                not_before: certificate.not_before,
                now,
            });
        }
        if !certificate.code_signing {
            return Err(ProvenanceError::MissingCodeSigning);
        }
        let expected = self.expected_identity(version);
        if !certificate.uris.iter().any(|uri| *uri == expected) {
            return Err(ProvenanceError::IdentityMismatch { expected });
        }
        let raw_issuer =
            certificate
                .extension(OIDC_ISSUER_OID)
                .ok_or(ProvenanceError::IssuerMissing {
                    oid: OIDC_ISSUER_OID,
                })?;
        let issuer =
            decode_der_string(raw_issuer).map_err(|reason| ProvenanceError::IssuerMalformed {
                oid: OIDC_ISSUER_OID,
                reason,
            })?;
        if issuer != self.oidc_issuer {
            return Err(ProvenanceError::IssuerMismatch {
                expected: self.oidc_issuer.clone(),
                actual: issuer,
            });
        }
        Ok(())
    }
}

impl From<&ReleaseSettings> for ProvenancePolicy {
    fn from(release: &ReleaseSettings) -> Self {
        Self {
            identity_template: release.identity_template.clone(),
            oidc_issuer: release.oidc_issuer.clone(),
        }
    }
}

/// [`ManifestVerifier`] for keyless-signed releases.
#[derive(Clone)]
pub struct ProvenanceVerifier {
    policy: ProvenancePolicy,
    clock: Arc<dyn Clock>,
}

impl ProvenanceVerifier {
    /// Build a verifier for the release identity in `release`.
    #[must_use]
    pub fn new(release: &ReleaseSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy: ProvenancePolicy::from(release),
            clock,
        }
    }

    /// The policy this verifier enforces.
    #[must_use]
    pub fn policy(&self) -> &ProvenancePolicy {
        &self.policy
    }
}

impl std::fmt::Debug for ProvenanceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvenanceVerifier")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ManifestVerifier for ProvenanceVerifier {
    fn verify(
        &self,
        version: &ReleaseVersion,
        manifest: &[u8],
        signature: &[u8],
        certificate: &[u8],
    ) -> Result<(), ProvenanceError> {
        let certificate = ProvenanceCertificate::decode(certificate)?;
        self.policy
            .check_certificate(&certificate, version, self.clock.now())?;
        let signature = decode_signature(signature)?;
        verify_signature(&certificate.public_key, manifest, &signature)?;
        log::debug!("verified manifest signature for {version}");
        Ok(())
    }
}

fn decode_signature(raw: &[u8]) -> Result<Vec<u8>, ProvenanceError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(ProvenanceError::EmptySignature);
    }
    decode_base64(raw, "signature")
}

/// Decode base64 ignoring all whitespace, trying the padded alphabet first
/// and then the unpadded one.
///
/// # Errors
///
/// Returns [`ProvenanceError::Base64`] when both alphabets fail or the
/// payload is empty.
pub fn decode_base64(raw: &[u8], what: &'static str) -> Result<Vec<u8>, ProvenanceError> {
    let compact: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(ProvenanceError::Base64 {
            what,
            reason: "payload is empty".to_owned(),
        });
    }
    STANDARD
        .decode(&compact)
        .or_else(|padded| {
            STANDARD_NO_PAD
                .decode(&compact)
                .map_err(|_| padded)
        })
        .map_err(|err| ProvenanceError::Base64 {
            what,
            reason: err.to_string(),
        })
}

fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_secs()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_secs()).map_or(i64::MIN, |secs| -secs),
    }
}
