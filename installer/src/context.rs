//! Injected collaborators shared by every resolution.
//!
//! A [`Dependencies`] bundle is built once and passed by reference into the
//! pipeline. Every collaborator is `Send + Sync` behind an `Arc`, so clones of
//! the bundle can be handed to concurrent callers.

use crate::dirs::{BaseDirs, SystemBaseDirs};
use crate::provenance::{ManifestVerifier, ProvenanceVerifier};
use crate::settings::Settings;
use crate::transport::{Transport, UreqTransport};
use crate::version::{CompiledVersionSource, VersionSource};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Wall-clock time and sleeping.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> SystemTime;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// [`Clock`] backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Collaborators used by the acquisition pipeline.
#[derive(Clone)]
pub struct Dependencies {
    /// Time source for backoff, lock polling and certificate checks.
    pub clock: Arc<dyn Clock>,
    /// HTTP client.
    pub transport: Arc<dyn Transport>,
    /// Signed manifest verification.
    pub verifier: Arc<dyn ManifestVerifier>,
    /// Build-metadata version detection.
    pub version_source: Arc<dyn VersionSource>,
    /// Home directory lookup for the default cache root.
    pub dirs: Arc<dyn BaseDirs>,
}

impl Dependencies {
    /// Production collaborators configured from `settings`.
    #[must_use]
    pub fn system(settings: &Settings) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let transport =
            UreqTransport::new(settings.download.timeout(), settings.download.max_redirects);
        Self {
            verifier: Arc::new(ProvenanceVerifier::new(
                &settings.release,
                Arc::clone(&clock),
            )),
            clock,
            transport: Arc::new(transport),
            version_source: Arc::new(CompiledVersionSource),
            dirs: Arc::new(SystemBaseDirs::new()),
        }
    }
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies").finish_non_exhaustive()
    }
}
