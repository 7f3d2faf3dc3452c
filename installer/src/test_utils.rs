//! Shared test utilities for the shimfetch crate.
//!
//! Available to unit tests and, through the `test-support` feature, to
//! integration tests. Nothing here touches the network.

use crate::context::{Clock, Dependencies};
use crate::dirs::BaseDirs;
use crate::platform::PlatformTarget;
use crate::provenance::ProvenanceVerifier;
use crate::settings::{ReleaseSettings, Settings};
use crate::transport::{HttpResponse, Transport, TransportError};
use crate::version::VersionSource;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use url::Url;

/// OID arcs of the OIDC issuer extension.
const OIDC_ISSUER_ARCS: &[u64] = &[1, 3, 6, 1, 4, 1, 57264, 1, 1];

/// A [`Clock`] whose sleeps advance virtual time without blocking.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
    slept: Mutex<Duration>,
}

impl ManualClock {
    /// Start at the real current time.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(SystemTime::now())
    }

    /// Start at `now`.
    #[must_use]
    pub fn starting_at(now: SystemTime) -> Self {
        Self {
            now: Mutex::new(now),
            slept: Mutex::new(Duration::ZERO),
        }
    }

    /// Move virtual time forward.
    ///
    /// # Panics
    ///
    /// Panics if the clock's mutex is poisoned.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock mutex");
        if let Some(later) = now.checked_add(by) {
            *now = later;
        }
    }

    /// Total time requested through [`Clock::sleep`].
    ///
    /// # Panics
    ///
    /// Panics if the clock's mutex is poisoned.
    #[must_use]
    pub fn slept(&self) -> Duration {
        *self.slept.lock().expect("clock mutex")
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().expect("clock mutex")
    }

    fn sleep(&self, duration: Duration) {
        let mut slept = self.slept.lock().expect("clock mutex");
        *slept = slept.saturating_add(duration);
        drop(slept);
        self.advance(duration);
    }
}

/// A canned reply for [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CannedResponse {
    /// 200 with this body and a matching `Content-Length`.
    Body(Vec<u8>),
    /// This status with an empty body.
    Status(u16),
    /// A transport-level failure.
    Failure(String),
    /// 200 whose body is shorter than the declared length.
    Truncated {
        /// Declared `Content-Length`.
        declared: u64,
        /// Bytes actually sent.
        body: Vec<u8>,
    },
}

#[derive(Debug, Default)]
struct Route {
    queued: VecDeque<CannedResponse>,
    fallback: Option<CannedResponse>,
}

/// An in-memory [`Transport`] keyed by exact URL.
///
/// Unknown URLs answer 404. Each route can queue one-off replies ahead of
/// its standing reply, and every request is counted.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<HashMap<String, usize>>,
}

impl MemoryTransport {
    /// An empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request for `url` with `body`.
    ///
    /// # Panics
    ///
    /// Panics if the route mutex is poisoned.
    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.set_fallback(url, CannedResponse::Body(body.into()));
    }

    /// Answer every request for `url` with `status`.
    ///
    /// # Panics
    ///
    /// Panics if the route mutex is poisoned.
    pub fn serve_status(&self, url: &str, status: u16) {
        self.set_fallback(url, CannedResponse::Status(status));
    }

    /// Answer the next request for `url` with `response`, ahead of the
    /// standing reply.
    ///
    /// # Panics
    ///
    /// Panics if the route mutex is poisoned.
    pub fn push(&self, url: &str, response: CannedResponse) {
        self.routes
            .lock()
            .expect("routes mutex")
            .entry(url.to_owned())
            .or_default()
            .queued
            .push_back(response);
    }

    /// Requests made for `url`.
    ///
    /// # Panics
    ///
    /// Panics if the request mutex is poisoned.
    #[must_use]
    pub fn requests(&self, url: &str) -> usize {
        self.requests
            .lock()
            .expect("requests mutex")
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Requests made for any URL.
    ///
    /// # Panics
    ///
    /// Panics if the request mutex is poisoned.
    #[must_use]
    pub fn total_requests(&self) -> usize {
        self.requests.lock().expect("requests mutex").values().sum()
    }

    fn set_fallback(&self, url: &str, response: CannedResponse) {
        self.routes
            .lock()
            .expect("routes mutex")
            .entry(url.to_owned())
            .or_default()
            .fallback = Some(response);
    }

    fn next_response(&self, url: &str) -> CannedResponse {
        let mut routes = self.routes.lock().expect("routes mutex");
        routes
            .get_mut(url)
            .and_then(|route| route.queued.pop_front().or_else(|| route.fallback.clone()))
            .unwrap_or(CannedResponse::Status(404))
    }
}

impl Transport for MemoryTransport {
    fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
        *self
            .requests
            .lock()
            .expect("requests mutex")
            .entry(url.to_string())
            .or_default() += 1;
        let (status, content_length, body) = match self.next_response(url.as_str()) {
            CannedResponse::Body(body) => (200, Some(body.len() as u64), body),
            CannedResponse::Status(status) => (status, Some(0), Vec::new()),
            CannedResponse::Truncated { declared, body } => (200, Some(declared), body),
            CannedResponse::Failure(reason) => {
                return Err(TransportError::Request {
                    url: url.to_string(),
                    reason,
                });
            }
        };
        Ok(HttpResponse {
            status,
            content_length,
            body: Box::new(Cursor::new(body)),
        })
    }
}

/// A [`VersionSource`] returning a fixed value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedVersionSource(pub Option<String>);

impl VersionSource for FixedVersionSource {
    fn detect(&self) -> Option<String> {
        self.0.clone()
    }
}

/// A [`BaseDirs`] returning a fixed home directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedBaseDirs(pub Option<PathBuf>);

impl BaseDirs for FixedBaseDirs {
    fn home_dir(&self) -> Option<PathBuf> {
        self.0.clone()
    }
}

/// Collaborators for tests: `transport`, `clock`, the real provenance
/// verifier for `settings`, no detected version and no home directory.
#[must_use]
pub fn dependencies(
    settings: &Settings,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
) -> Dependencies {
    Dependencies {
        verifier: Arc::new(ProvenanceVerifier::new(
            &settings.release,
            Arc::clone(&clock),
        )),
        clock,
        transport,
        version_source: Arc::new(FixedVersionSource::default()),
        dirs: Arc::new(FixedBaseDirs::default()),
    }
}

/// Build a gzip-compressed tar archive of regular files.
///
/// # Panics
///
/// Panics if the in-memory archive cannot be written.
#[must_use]
pub fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_entry_type(tar::EntryType::Regular);
        builder
            .append_data(&mut header, path, *data)
            .expect("append archive entry");
    }
    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .expect("finish archive")
}

/// Encode `value` as a DER UTF8String.
#[must_use]
pub fn der_utf8_string(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut der = vec![0x0C];
    match u8::try_from(bytes.len()) {
        Ok(len) if len < 0x80 => der.push(len),
        Ok(len) => der.extend([0x81, len]),
        Err(_) => {
            let len = u16::try_from(bytes.len()).expect("string shorter than 64 KiB");
            der.push(0x82);
            der.extend(len.to_be_bytes());
        }
    }
    der.extend_from_slice(bytes);
    der
}

/// Signing key algorithm for generated certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// ECDSA on P-256.
    P256,
    /// ECDSA on P-384.
    P384,
    /// Ed25519.
    Ed25519,
}

/// Description of a generated signing certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerSpec {
    /// URI SAN placed in the certificate.
    pub identity: String,
    /// Raw DER value of the OIDC issuer extension, if any.
    pub issuer_extension: Option<Vec<u8>>,
    /// Whether to include the code-signing extended key usage.
    pub code_signing: bool,
    /// Year of the not-valid-before bound (January 1st).
    pub not_before_year: i32,
    /// Key algorithm.
    pub algorithm: KeyAlgorithm,
}

impl SignerSpec {
    /// A signer that satisfies `release` for `version`.
    #[must_use]
    pub fn for_release(release: &ReleaseSettings, version: &str) -> Self {
        Self {
            identity: release.expected_identity(version),
            issuer_extension: Some(der_utf8_string(&release.oidc_issuer)),
            code_signing: true,
            not_before_year: 2024,
            algorithm: KeyAlgorithm::P256,
        }
    }

    /// Sign `manifest`, returning a PEM certificate and a base64 signature.
    ///
    /// # Panics
    ///
    /// Panics if certificate generation or signing fails.
    #[must_use]
    pub fn sign(&self, manifest: &[u8]) -> SignedManifest {
        let algorithm = match self.algorithm {
            KeyAlgorithm::P256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::P384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            KeyAlgorithm::Ed25519 => &rcgen::PKCS_ED25519,
        };
        let key = rcgen::KeyPair::generate_for(algorithm).expect("generate key pair");

        let mut params = rcgen::CertificateParams::default();
        params.not_before = rcgen::date_time_ymd(self.not_before_year, 1, 1);
        params.not_after = rcgen::date_time_ymd(2100, 1, 1);
        params.subject_alt_names = vec![rcgen::SanType::URI(
            self.identity.as_str().try_into().expect("IA5 identity"),
        )];
        params.extended_key_usages = if self.code_signing {
            vec![rcgen::ExtendedKeyUsagePurpose::CodeSigning]
        } else {
            vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth]
        };
        if let Some(issuer) = &self.issuer_extension {
            params.custom_extensions = vec![rcgen::CustomExtension::from_oid_content(
                OIDC_ISSUER_ARCS,
                issuer.clone(),
            )];
        }
        let certificate = params.self_signed(&key).expect("self-sign certificate");

        let signature = sign_with(self.algorithm, &key.serialize_der(), manifest);
        SignedManifest {
            certificate: certificate.pem().into_bytes(),
            signature: STANDARD.encode(signature).into_bytes(),
        }
    }
}

fn sign_with(algorithm: KeyAlgorithm, pkcs8: &[u8], manifest: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(manifest);
    match algorithm {
        KeyAlgorithm::P256 => {
            use p256::ecdsa::signature::hazmat::PrehashSigner;
            use p256::pkcs8::DecodePrivateKey;

            let key = p256::ecdsa::SigningKey::from_pkcs8_der(pkcs8).expect("P-256 key");
            let signature: p256::ecdsa::Signature =
                key.sign_prehash(&digest).expect("P-256 signature");
            signature.to_der().as_bytes().to_vec()
        }
        KeyAlgorithm::P384 => {
            use p384::ecdsa::signature::hazmat::PrehashSigner;
            use p384::pkcs8::DecodePrivateKey;

            let key = p384::ecdsa::SigningKey::from_pkcs8_der(pkcs8).expect("P-384 key");
            let signature: p384::ecdsa::Signature =
                key.sign_prehash(&digest).expect("P-384 signature");
            signature.to_der().as_bytes().to_vec()
        }
        KeyAlgorithm::Ed25519 => {
            use ed25519_dalek::Signer;
            use ed25519_dalek::pkcs8::DecodePrivateKey;

            let key = ed25519_dalek::SigningKey::from_pkcs8_der(pkcs8).expect("Ed25519 key");
            key.sign(manifest).to_bytes().to_vec()
        }
    }
}

/// Certificate and signature produced by [`SignerSpec::sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedManifest {
    /// PEM-encoded certificate.
    pub certificate: Vec<u8>,
    /// Base64-encoded detached signature.
    pub signature: Vec<u8>,
}

/// A complete, correctly signed release for one platform.
#[derive(Debug, Clone)]
pub struct ReleaseFixture {
    /// Normalized version tag.
    pub version: String,
    /// Platform the archive targets.
    pub platform: PlatformTarget,
    /// Library bytes inside the archive.
    pub library: Vec<u8>,
    /// Archive asset name.
    pub archive_name: String,
    /// Archive bytes.
    pub archive: Vec<u8>,
    /// `SHA256SUMS` contents.
    pub manifest: Vec<u8>,
    /// Signature and certificate over `manifest`.
    pub signed: SignedManifest,
}

impl ReleaseFixture {
    /// Build a release of `version` for `platform` that `settings` accepts.
    ///
    /// The archive holds the library under `dist/`, and the manifest lists an
    /// unrelated asset before the archive.
    #[must_use]
    pub fn new(settings: &Settings, version: &str, platform: PlatformTarget) -> Self {
        let library = format!("\x7fELF runtime shim {version} for {platform}").into_bytes();
        let archive_name = platform.archive_name(&settings.release.archive_prefix, version);
        let library_entry = format!("dist/{}", platform.library_file_name());
        let archive = build_archive(&[
            ("dist/README.md", b"runtime shim".as_slice()),
            (library_entry.as_str(), library.as_slice()),
        ]);
        let manifest = format!(
            "{}  other-asset.tar.gz\n{}  *{archive_name}\n",
            "0".repeat(64),
            crate::digest::Sha256Digest::of_bytes(&archive),
        )
        .into_bytes();
        let signed = SignerSpec::for_release(&settings.release, version).sign(&manifest);
        Self {
            version: version.to_owned(),
            platform,
            library,
            archive_name,
            archive,
            manifest,
            signed,
        }
    }

    /// URL of `asset` under `mirror` for this release.
    #[must_use]
    pub fn url(&self, mirror: &str, asset: &str) -> String {
        format!("{}/{}/{asset}", mirror.trim_end_matches('/'), self.version)
    }

    /// Serve every asset of this release from `mirror`.
    pub fn serve(&self, transport: &MemoryTransport, mirror: &str) {
        transport.serve(&self.url(mirror, "SHA256SUMS"), self.manifest.clone());
        transport.serve(
            &self.url(mirror, "SHA256SUMS.sig"),
            self.signed.signature.clone(),
        );
        transport.serve(
            &self.url(mirror, "SHA256SUMS.pem"),
            self.signed.certificate.clone(),
        );
        transport.serve(&self.url(mirror, &self.archive_name), self.archive.clone());
    }
}
