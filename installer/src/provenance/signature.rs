//! Detached signature verification over the manifest.
//!
//! ECDSA and RSA keys verify the SHA-256 digest of the manifest; Ed25519
//! verifies the raw manifest bytes.

use super::certificate::PublicKeyMaterial;
use super::error::ProvenanceError;
use sha2::{Digest, Sha256};

/// Verify `signature` over `message` with `key`.
///
/// # Errors
///
/// Returns [`ProvenanceError::EmptySignature`] for an empty signature,
/// [`ProvenanceError::UnsupportedKey`] or [`ProvenanceError::MalformedKey`]
/// when the key cannot be used, and [`ProvenanceError::SignatureInvalid`]
/// when verification fails.
pub fn verify_signature(
    key: &PublicKeyMaterial,
    message: &[u8],
    signature: &[u8],
) -> Result<(), ProvenanceError> {
    if signature.is_empty() {
        return Err(ProvenanceError::EmptySignature);
    }
    let digest = Sha256::digest(message);
    match key {
        PublicKeyMaterial::EcdsaP256(point) => verify_p256(point, &digest, signature),
        PublicKeyMaterial::EcdsaP384(point) => verify_p384(point, &digest, signature),
        PublicKeyMaterial::Rsa(der) => verify_rsa(der, &digest, signature),
        PublicKeyMaterial::Ed25519(raw) => verify_ed25519(raw, message, signature),
        PublicKeyMaterial::Unsupported(algorithm) => Err(ProvenanceError::UnsupportedKey {
            algorithm: algorithm.clone(),
        }),
    }
}

fn malformed(algorithm: &'static str, err: &impl std::fmt::Display) -> ProvenanceError {
    ProvenanceError::MalformedKey {
        algorithm,
        reason: err.to_string(),
    }
}

fn verify_p256(point: &[u8], digest: &[u8], signature: &[u8]) -> Result<(), ProvenanceError> {
    use p256::ecdsa::signature::hazmat::PrehashVerifier;
    use p256::ecdsa::{Signature, VerifyingKey};

    const ALGORITHM: &str = "ECDSA P-256";
    let key = VerifyingKey::from_sec1_bytes(point).map_err(|err| malformed(ALGORITHM, &err))?;
    let invalid = || ProvenanceError::SignatureInvalid {
        algorithm: ALGORITHM,
    };
    let signature = Signature::from_der(signature).map_err(|_| invalid())?;
    key.verify_prehash(digest, &signature).map_err(|_| invalid())
}

fn verify_p384(point: &[u8], digest: &[u8], signature: &[u8]) -> Result<(), ProvenanceError> {
    use p384::ecdsa::signature::hazmat::PrehashVerifier;
    use p384::ecdsa::{Signature, VerifyingKey};

    const ALGORITHM: &str = "ECDSA P-384";
    let key = VerifyingKey::from_sec1_bytes(point).map_err(|err| malformed(ALGORITHM, &err))?;
    let invalid = || ProvenanceError::SignatureInvalid {
        algorithm: ALGORITHM,
    };
    let signature = Signature::from_der(signature).map_err(|_| invalid())?;
    key.verify_prehash(digest, &signature).map_err(|_| invalid())
}

fn verify_rsa(der: &[u8], digest: &[u8], signature: &[u8]) -> Result<(), ProvenanceError> {
    use rsa::pkcs1::DecodeRsaPublicKey;
    use rsa::{Pkcs1v15Sign, RsaPublicKey};

    const ALGORITHM: &str = "RSA";
    let key = RsaPublicKey::from_pkcs1_der(der).map_err(|err| malformed(ALGORITHM, &err))?;
    key.verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
        .map_err(|_| ProvenanceError::SignatureInvalid {
            algorithm: ALGORITHM,
        })
}

fn verify_ed25519(raw: &[u8], message: &[u8], signature: &[u8]) -> Result<(), ProvenanceError> {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    const ALGORITHM: &str = "Ed25519";
    let bytes: &[u8; 32] = raw
        .try_into()
        .map_err(|_| malformed(ALGORITHM, &format!("expected 32 bytes, got {}", raw.len())))?;
    let key = VerifyingKey::from_bytes(bytes).map_err(|err| malformed(ALGORITHM, &err))?;
    let invalid = || ProvenanceError::SignatureInvalid {
        algorithm: ALGORITHM,
    };
    let signature = Signature::from_slice(signature).map_err(|_| invalid())?;
    key.verify(message, &signature).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_signature_is_rejected_before_key_use() {
        let key = PublicKeyMaterial::Unsupported("1.2.3".to_owned());
        assert_eq!(
            verify_signature(&key, b"manifest", b""),
            Err(ProvenanceError::EmptySignature)
        );
    }

    #[test]
    fn unsupported_key_is_rejected() {
        let key = PublicKeyMaterial::Unsupported("1.2.840.10040.4.1".to_owned());
        let err = verify_signature(&key, b"manifest", b"sig").expect_err("expected failure");
        assert!(matches!(err, ProvenanceError::UnsupportedKey { .. }));
    }

    #[test]
    fn malformed_ec_point_is_reported() {
        let key = PublicKeyMaterial::EcdsaP256(vec![0x04; 65]);
        let err = verify_signature(&key, b"manifest", b"sig").expect_err("expected failure");
        assert!(matches!(
            err,
            ProvenanceError::MalformedKey {
                algorithm: "ECDSA P-256",
                ..
            }
        ));
    }

    #[test]
    fn rsa_pkcs1v15_signature_over_the_digest_verifies() {
        use rsa::pkcs1::EncodeRsaPublicKey;
        use rsa::rand_core::OsRng;
        use rsa::{Pkcs1v15Sign, RsaPrivateKey};

        let manifest = b"0123456789abcdef  shim.tar.gz\n";
        let private = RsaPrivateKey::new(&mut OsRng, 1024).expect("generate RSA key");
        let der = private
            .to_public_key()
            .to_pkcs1_der()
            .expect("encode public key")
            .as_bytes()
            .to_vec();
        let digest = Sha256::digest(manifest);
        let mut signature = private
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .expect("sign digest");
        let key = PublicKeyMaterial::Rsa(der);

        assert_eq!(verify_signature(&key, manifest, &signature), Ok(()));

        signature[0] ^= 0x01;
        assert_eq!(
            verify_signature(&key, manifest, &signature),
            Err(ProvenanceError::SignatureInvalid { algorithm: "RSA" })
        );
    }

    #[test]
    fn malformed_rsa_key_is_reported() {
        let key = PublicKeyMaterial::Rsa(vec![0x30, 0x00]);
        let err = verify_signature(&key, b"manifest", b"sig").expect_err("expected failure");
        assert!(matches!(err, ProvenanceError::MalformedKey { algorithm: "RSA", .. }));
    }

    #[test]
    fn short_ed25519_key_is_reported() {
        let key = PublicKeyMaterial::Ed25519(vec![1, 2, 3]);
        let err = verify_signature(&key, b"manifest", b"sig").expect_err("expected failure");
        assert!(matches!(
            err,
            ProvenanceError::MalformedKey {
                algorithm: "Ed25519",
                ..
            }
        ));
    }
}
