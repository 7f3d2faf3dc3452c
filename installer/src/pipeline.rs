//! The acquisition pipeline: cache check, lock, download, verify, install.
//!
//! A cache miss takes the per-entry [`DownloadLock`], re-checks the cache,
//! then walks the configured mirrors in order. For each mirror the signed
//! manifest, its signature and certificate are downloaded and verified
//! before the archive is touched. Only network failures move on to the next
//! mirror; provenance and integrity failures end the acquisition.
//!
//! The lock is released on every exit path. A panic inside the locked
//! section still releases it through [`DownloadLock`]'s `Drop`.

use crate::cache::{CacheEntry, CacheStore, is_present};
use crate::context::Dependencies;
use crate::error::{Result, ShimError};
use crate::extract::{self, ExtractionError};
use crate::fetch::ReleaseFetcher;
use crate::lock::{DownloadLock, LockConfig, LockError};
use crate::manifest::{self, ManifestError, ManifestMatch};
use crate::mirror::{Mirror, MirrorRegistry};
use crate::platform::PlatformTarget;
use crate::settings::Settings;
use crate::version::ReleaseVersion;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::fs;
use std::sync::Arc;

/// Name of the checksum manifest asset.
pub const MANIFEST_ASSET: &str = "SHA256SUMS";
/// Name of the detached manifest signature asset.
pub const SIGNATURE_ASSET: &str = "SHA256SUMS.sig";
/// Name of the signing certificate asset.
pub const CERTIFICATE_ASSET: &str = "SHA256SUMS.pem";

/// Progress of one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The library is not cached.
    NotPresent,
    /// Waiting for the download lock.
    LockAcquiring,
    /// The download lock is held.
    LockHeld,
    /// Manifest, signature and certificate are downloaded.
    ManifestFetched,
    /// The manifest signature and certificate checks passed.
    ProvenanceVerified,
    /// The archive's expected digest is known.
    ChecksumResolved,
    /// The archive is on disk.
    ArchiveFetched,
    /// The archive matches the manifest digest.
    ChecksumReverified,
    /// The library is extracted to the staging path.
    Extracted,
    /// The library is installed.
    Present,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotPresent => "not-present",
            Self::LockAcquiring => "lock-acquiring",
            Self::LockHeld => "lock-held",
            Self::ManifestFetched => "manifest-fetched",
            Self::ProvenanceVerified => "provenance-verified",
            Self::ChecksumResolved => "checksum-resolved",
            Self::ArchiveFetched => "archive-fetched",
            Self::ChecksumReverified => "checksum-reverified",
            Self::Extracted => "extracted",
            Self::Present => "present",
        };
        f.write_str(name)
    }
}

/// Records stage transitions for logging.
struct StageLog<'a> {
    label: &'a Utf8Path,
    current: Stage,
}

impl<'a> StageLog<'a> {
    fn new(label: &'a Utf8Path) -> Self {
        Self {
            label,
            current: Stage::NotPresent,
        }
    }

    fn enter(&mut self, stage: Stage) {
        log::debug!("{}: {} -> {stage}", self.label, self.current);
        self.current = stage;
    }

    fn fail(&self, err: ShimError) -> ShimError {
        log::warn!(
            "{}: acquisition failed at stage {}: {}",
            self.label,
            self.current,
            err.error_chain()
        );
        err
    }
}

/// Downloads and installs one library into the cache.
#[derive(Debug)]
pub struct Acquisition<'a> {
    settings: &'a Settings,
    deps: &'a Dependencies,
}

impl<'a> Acquisition<'a> {
    /// Create a pipeline using `settings` and the collaborators in `deps`.
    #[must_use]
    pub fn new(settings: &'a Settings, deps: &'a Dependencies) -> Self {
        Self { settings, deps }
    }

    /// Return the cached library for `version` on `platform`, downloading
    /// and installing it first if needed.
    ///
    /// # Errors
    ///
    /// Returns a [`ShimError`] describing the first failure. When every
    /// mirror fails with a network error the failures are collected into
    /// [`ShimError::MirrorsExhausted`].
    pub fn acquire(
        &self,
        cache: &CacheStore,
        version: &ReleaseVersion,
        platform: &PlatformTarget,
    ) -> Result<Utf8PathBuf> {
        let entry = cache.entry(version, platform);
        if entry.exists() {
            log::debug!("cache hit for {}", entry.library_path());
            return Ok(entry.library_path().to_owned());
        }

        let mut stages = StageLog::new(entry.library_path());
        entry.ensure_dir().map_err(|err| stages.fail(err.into()))?;

        stages.enter(Stage::LockAcquiring);
        let lock = DownloadLock::acquire(
            &entry.lock_path(),
            &LockConfig::from(&self.settings.download),
            Arc::clone(&self.deps.clock),
        )
        .map_err(|err| stages.fail(err.into()))?;
        stages.enter(Stage::LockHeld);

        let outcome = if entry.exists() {
            log::debug!("{} was installed while waiting for the lock", entry.library_path());
            Ok(())
        } else {
            self.download(&entry, version, platform, &mut stages)
        };
        join_release(outcome, lock.release()).map_err(|err| stages.fail(err))?;
        stages.enter(Stage::Present);
        Ok(entry.library_path().to_owned())
    }

    fn download(
        &self,
        entry: &CacheEntry,
        version: &ReleaseVersion,
        platform: &PlatformTarget,
        stages: &mut StageLog<'_>,
    ) -> Result<()> {
        let registry = MirrorRegistry::from_candidates(&self.settings.release.mirrors)?;
        let mut failures = Vec::new();
        for mirror in registry.mirrors() {
            let attempt = MirrorAttempt {
                settings: self.settings,
                deps: self.deps,
                mirror,
                entry,
                version,
                platform,
            };
            match attempt.run(stages) {
                Ok(()) => return Ok(()),
                Err(err @ ShimError::Network { .. }) => {
                    log::warn!("mirror {mirror} failed: {}", err.error_chain());
                    failures.push(err);
                    stages.enter(Stage::LockHeld);
                }
                Err(err) => return Err(err),
            }
        }
        Err(ShimError::MirrorsExhausted { failures })
    }
}

/// One pass of the pipeline against a single mirror.
struct MirrorAttempt<'a> {
    settings: &'a Settings,
    deps: &'a Dependencies,
    mirror: &'a Mirror,
    entry: &'a CacheEntry,
    version: &'a ReleaseVersion,
    platform: &'a PlatformTarget,
}

impl MirrorAttempt<'_> {
    fn run(&self, stages: &mut StageLog<'_>) -> Result<()> {
        let metadata_limit = self.settings.download.max_metadata_bytes;
        let manifest_path = self.fetch(MANIFEST_ASSET, metadata_limit)?;
        let signature_path = self.fetch(SIGNATURE_ASSET, metadata_limit)?;
        let certificate_path = self.fetch(CERTIFICATE_ASSET, metadata_limit)?;
        stages.enter(Stage::ManifestFetched);

        self.deps
            .verifier
            .verify(
                self.version,
                &read(&manifest_path)?,
                &read(&signature_path)?,
                &read(&certificate_path)?,
            )
            .map_err(|source| ShimError::Provenance {
                mirror: self.mirror.to_string(),
                source,
            })?;
        stages.enter(Stage::ProvenanceVerified);

        let candidates = self
            .platform
            .archive_candidates(&self.settings.release.archive_prefix, self.version);
        let matched = manifest::resolve(&manifest_path, &candidates)
            .map_err(checksum_error("failed to resolve the archive checksum"))?;
        stages.enter(Stage::ChecksumResolved);

        let archive_path = self.obtain_archive(&matched)?;
        stages.enter(Stage::ArchiveFetched);

        if let Err(err) = manifest::verify_file(&archive_path, &matched.digest) {
            discard(&archive_path);
            return Err(checksum_error("downloaded archive failed verification")(err));
        }
        stages.enter(Stage::ChecksumReverified);

        let staging = self.entry.staging_path();
        let library = self.platform.library_file_name();
        extract::extract(
            &archive_path,
            library,
            &staging,
            self.settings.download.max_artifact_bytes,
        )
        .map_err(|source| extraction_error(library, source))?;
        stages.enter(Stage::Extracted);

        if let Err(err) = self.entry.install(&staging) {
            discard(&staging);
            return Err(err.into());
        }
        Ok(())
    }

    /// Reuse a cached archive whose digest matches, otherwise download it.
    fn obtain_archive(&self, matched: &ManifestMatch) -> Result<Utf8PathBuf> {
        let archive_path = self.entry.asset_path(&matched.asset_name);
        if is_present(&archive_path) {
            match manifest::verify_file(&archive_path, &matched.digest) {
                Ok(()) => {
                    log::debug!("reusing cached archive {archive_path}");
                    return Ok(archive_path);
                }
                Err(err) => {
                    log::warn!("cached archive {archive_path} is corrupt, downloading again: {err}");
                    fs::remove_file(&archive_path).map_err(|source| ShimError::Io {
                        context: format!("failed to remove corrupt archive {archive_path}"),
                        source,
                    })?;
                }
            }
        }
        self.fetch(
            &matched.asset_name,
            self.settings.download.max_artifact_bytes,
        )
    }

    fn fetch(&self, asset: &str, max_bytes: u64) -> Result<Utf8PathBuf> {
        let download = &self.settings.download;
        let fetcher = ReleaseFetcher::new(
            self.deps.transport.as_ref(),
            self.deps.clock.as_ref(),
            download.attempts,
            download.backoff(),
        );
        let dest = self.entry.asset_path(asset);
        fetcher
            .fetch(self.mirror, self.version, asset, &dest, max_bytes)
            .map_err(|source| ShimError::Network {
                asset: asset.to_owned(),
                mirror: self.mirror.to_string(),
                source: Box::new(source),
            })?;
        Ok(dest)
    }
}

/// Combine the acquisition outcome with the result of releasing the lock.
fn join_release(outcome: Result<()>, released: std::result::Result<(), LockError>) -> Result<()> {
    match (outcome, released) {
        (Ok(()), released) => released.map_err(ShimError::from),
        (Err(err), Ok(())) => Err(err),
        (Err(failure), Err(release)) => Err(ShimError::LockNotReleased {
            failure: Box::new(failure),
            release,
        }),
    }
}

fn read(path: &Utf8Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| ShimError::Io {
        context: format!("failed to read {path}"),
        source,
    })
}

fn checksum_error(context: &'static str) -> impl Fn(ManifestError) -> ShimError {
    move |source| ShimError::Checksum {
        context: context.to_owned(),
        source,
    }
}

fn extraction_error(entry: &str, source: ExtractionError) -> ShimError {
    ShimError::Extraction {
        entry: entry.to_owned(),
        source,
    }
}

fn discard(path: &Utf8Path) {
    if let Err(err) = fs::remove_file(path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        log::warn!("failed to remove {path}: {err}");
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
