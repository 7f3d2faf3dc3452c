//! Certificate decoding into an owned, checkable value.

use super::error::ProvenanceError;
use super::decode_base64;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_ED25519: &str = "1.3.101.112";

const DER_UTF8_STRING: u8 = 0x0C;
const DER_PRINTABLE_STRING: u8 = 0x13;
const DER_IA5_STRING: u8 = 0x16;

/// Public key material taken from the certificate's SPKI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeyMaterial {
    /// SEC1-encoded P-256 point.
    EcdsaP256(Vec<u8>),
    /// SEC1-encoded P-384 point.
    EcdsaP384(Vec<u8>),
    /// PKCS#1 `RSAPublicKey` DER.
    Rsa(Vec<u8>),
    /// Raw 32-byte Ed25519 key.
    Ed25519(Vec<u8>),
    /// Anything else, described by algorithm.
    Unsupported(String),
}

/// The parts of an X.509 certificate the provenance checks read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceCertificate {
    /// Not-valid-before bound in unix seconds.
    pub not_before: i64,
    /// Whether the extended key usage includes code signing.
    pub code_signing: bool,
    /// URI subject alternative names.
    pub uris: Vec<String>,
    /// Raw extension values by dotted OID.
    pub extensions: Vec<(String, Vec<u8>)>,
    /// Subject public key.
    pub public_key: PublicKeyMaterial,
}

impl ProvenanceCertificate {
    /// Decode a PEM certificate, or a base64 encoding of one.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::EmptyCertificate`],
    /// [`ProvenanceError::Base64`], [`ProvenanceError::Pem`],
    /// [`ProvenanceError::TrailingData`] or [`ProvenanceError::Certificate`]
    /// for the corresponding decoding failure.
    pub fn decode(raw: &[u8]) -> Result<Self, ProvenanceError> {
        let trimmed = raw.trim_ascii();
        if trimmed.is_empty() {
            return Err(ProvenanceError::EmptyCertificate);
        }
        let pem_bytes = if contains(trimmed, b"BEGIN CERTIFICATE") {
            trimmed.to_vec()
        } else {
            decode_base64(trimmed, "certificate")?
        };
        let (remainder, pem) = x509_parser::pem::parse_x509_pem(&pem_bytes).map_err(|err| {
            ProvenanceError::Pem {
                reason: err.to_string(),
            }
        })?;
        if !remainder.trim_ascii().is_empty() {
            return Err(ProvenanceError::TrailingData);
        }
        Self::from_der(&pem.contents)
    }

    /// Parse a DER certificate.
    ///
    /// # Errors
    ///
    /// Returns [`ProvenanceError::Certificate`] if parsing fails.
    pub fn from_der(der: &[u8]) -> Result<Self, ProvenanceError> {
        let (_, cert) = X509Certificate::from_der(der).map_err(|err| certificate_error(&err))?;
        let code_signing = cert
            .extended_key_usage()
            .map_err(|err| certificate_error(&err))?
            .is_some_and(|eku| eku.value.code_signing);
        let uris = cert
            .subject_alternative_name()
            .map_err(|err| certificate_error(&err))?
            .map(|san| {
                san.value
                    .general_names
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::URI(uri) => Some((*uri).to_owned()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let extensions = cert
            .extensions()
            .iter()
            .map(|ext| (ext.oid.to_id_string(), ext.value.to_vec()))
            .collect();
        Ok(Self {
            not_before: cert.validity().not_before.timestamp(),
            code_signing,
            uris,
            extensions,
            public_key: classify_key(&cert),
        })
    }

    /// Raw value of the first extension with `oid`.
    #[must_use]
    pub fn extension(&self, oid: &str) -> Option<&[u8]> {
        self.extensions
            .iter()
            .find(|(id, _)| id == oid)
            .map(|(_, value)| value.as_slice())
    }
}

fn certificate_error(err: &impl std::fmt::Display) -> ProvenanceError {
    ProvenanceError::Certificate {
        reason: err.to_string(),
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn classify_key(cert: &X509Certificate<'_>) -> PublicKeyMaterial {
    let spki = cert.public_key();
    let algorithm = spki.algorithm.algorithm.to_id_string();
    let bits = spki.subject_public_key.data.to_vec();
    match algorithm.as_str() {
        OID_EC_PUBLIC_KEY => match bits.len() {
            33 | 65 => PublicKeyMaterial::EcdsaP256(bits),
            49 | 97 => PublicKeyMaterial::EcdsaP384(bits),
            other => PublicKeyMaterial::Unsupported(format!("EC key of {other} bytes")),
        },
        OID_RSA_ENCRYPTION => PublicKeyMaterial::Rsa(bits),
        OID_ED25519 => PublicKeyMaterial::Ed25519(bits),
        _ => PublicKeyMaterial::Unsupported(algorithm),
    }
}

/// Decode a DER UTF8String, `PrintableString` or `IA5String` in full.
///
/// # Errors
///
/// Returns a description of the failure for any other tag, a malformed
/// length, trailing bytes, or non-UTF-8 content.
pub fn decode_der_string(der: &[u8]) -> Result<String, String> {
    let (&tag, rest) = der.split_first().ok_or("empty value")?;
    if !matches!(tag, DER_UTF8_STRING | DER_PRINTABLE_STRING | DER_IA5_STRING) {
        return Err(format!("unexpected ASN.1 tag 0x{tag:02x}"));
    }
    let (&first, rest) = rest.split_first().ok_or("missing length")?;
    let (len, body) = if first < 0x80 {
        (usize::from(first), rest)
    } else {
        let count = usize::from(first & 0x7f);
        if count == 0 || count > 4 || rest.len() < count {
            return Err("invalid length".to_owned());
        }
        let (len_bytes, body) = rest.split_at(count);
        let len = len_bytes
            .iter()
            .fold(0usize, |acc, byte| (acc << 8) | usize::from(*byte));
        (len, body)
    };
    if body.len() != len {
        return Err(format!(
            "declared length {len} does not match {} content bytes",
            body.len()
        ));
    }
    String::from_utf8(body.to_vec()).map_err(|err| err.to_string())
}
