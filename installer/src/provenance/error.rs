//! Error types for certificate and signature checks.

use thiserror::Error;

/// A provenance check failed. Each check has its own variant so callers and
/// logs can tell the reasons apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvenanceError {
    /// The certificate payload is empty or whitespace.
    #[error("certificate payload is empty")]
    EmptyCertificate,

    /// A base64 payload could not be decoded in either alphabet.
    #[error("invalid base64 {what}: {reason}")]
    Base64 {
        /// Which payload was being decoded.
        what: &'static str,
        /// Decoder failure for the padded alphabet.
        reason: String,
    },

    /// No PEM block could be decoded.
    #[error("failed to decode certificate PEM: {reason}")]
    Pem {
        /// Decoder failure.
        reason: String,
    },

    /// Non-whitespace content follows the first PEM block.
    #[error("certificate PEM contains unexpected trailing data")]
    TrailingData,

    /// The DER certificate could not be parsed.
    #[error("failed to parse certificate: {reason}")]
    Certificate {
        /// Parser failure.
        reason: String,
    },

    /// The verification time precedes the certificate's validity window.
    #[error("certificate is not yet valid: valid from {not_before} (unix seconds), now {now}")]
    NotYetValid {
        /// Not-valid-before bound in unix seconds.
        not_before: i64,
        /// Verification time in unix seconds.
        now: i64,
    },

    /// The certificate lacks the code-signing extended key usage.
    #[error("certificate is missing code signing extended key usage")]
    MissingCodeSigning,

    /// No URI SAN equals the expected release identity.
    #[error("certificate identity does not match expected release identity {expected}")]
    IdentityMismatch {
        /// Identity built from the template and version.
        expected: String,
    },

    /// The OIDC issuer extension is absent.
    #[error("certificate missing OIDC issuer extension {oid}")]
    IssuerMissing {
        /// Extension OID.
        oid: &'static str,
    },

    /// The OIDC issuer extension does not hold a DER string.
    #[error("failed to decode certificate extension {oid}: {reason}")]
    IssuerMalformed {
        /// Extension OID.
        oid: &'static str,
        /// Decoder failure.
        reason: String,
    },

    /// The OIDC issuer differs from the expected issuer.
    #[error("certificate OIDC issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Configured issuer.
        expected: String,
        /// Issuer found in the certificate.
        actual: String,
    },

    /// The signature payload is empty.
    #[error("signature is empty")]
    EmptySignature,

    /// The certificate's public key algorithm is not supported.
    #[error("unsupported certificate public key type {algorithm}")]
    UnsupportedKey {
        /// Algorithm OID or description.
        algorithm: String,
    },

    /// The public key bytes could not be decoded.
    #[error("malformed {algorithm} public key: {reason}")]
    MalformedKey {
        /// Key algorithm.
        algorithm: &'static str,
        /// Decoder failure.
        reason: String,
    },

    /// The signature does not verify against the manifest.
    #[error("{algorithm} signature verification failed")]
    SignatureInvalid {
        /// Key algorithm.
        algorithm: &'static str,
    },
}
