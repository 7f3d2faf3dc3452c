//! Library path resolution for callers that load the runtime shim.
//!
//! An explicit path or the `CHROMA_LIB_PATH` environment variable is trusted
//! as given and returned without verification. Otherwise the version and
//! platform are selected and the [`Acquisition`] pipeline supplies a verified
//! cached copy.

use crate::cache::CacheStore;
use crate::context::Dependencies;
use crate::error::{Result, ShimError};
use crate::pipeline::Acquisition;
use crate::platform::PlatformTarget;
use crate::settings::Settings;
use crate::version::resolve_version;
use camino::Utf8PathBuf;

/// Environment variable naming a library path that bypasses the download.
pub const LIB_PATH_ENV: &str = "CHROMA_LIB_PATH";

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryRequest {
    /// Path supplied directly by the caller.
    pub explicit_path: Option<String>,
    /// Path taken from [`LIB_PATH_ENV`].
    pub env_override: Option<String>,
    /// Desired version tag; detected or default when absent.
    pub version: Option<String>,
    /// Cache root replacing `<home>/.cache/chroma/local_shim`.
    pub cache_root: Option<Utf8PathBuf>,
    /// Whether a missing library may be downloaded.
    pub auto_download: bool,
    /// Platform replacing the running one.
    pub platform: Option<PlatformTarget>,
}

impl Default for LibraryRequest {
    fn default() -> Self {
        Self {
            explicit_path: None,
            env_override: None,
            version: None,
            cache_root: None,
            auto_download: true,
            platform: None,
        }
    }
}

impl LibraryRequest {
    /// A request with `env_override` read from [`LIB_PATH_ENV`].
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            env_override: std::env::var(LIB_PATH_ENV).ok(),
            ..Self::default()
        }
    }
}

/// Resolve the path of the runtime library for `request`.
///
/// # Errors
///
/// Returns [`ShimError::Resolve`] wrapping the underlying failure. Use
/// [`ShimError::kind`] to classify it.
pub fn resolve_library_path(
    request: &LibraryRequest,
    settings: &Settings,
    deps: &Dependencies,
) -> Result<Utf8PathBuf> {
    resolve(request, settings, deps).map_err(|err| ShimError::Resolve(Box::new(err)))
}

fn resolve(request: &LibraryRequest, settings: &Settings, deps: &Dependencies) -> Result<Utf8PathBuf> {
    let trusted = [&request.explicit_path, &request.env_override]
        .into_iter()
        .flatten()
        .map(|path| path.trim())
        .find(|path| !path.is_empty());
    if let Some(path) = trusted {
        log::debug!("using caller-supplied library path {path}");
        return Ok(Utf8PathBuf::from(path));
    }
    if !request.auto_download {
        return Err(ShimError::NotConfigured);
    }

    settings.validate()?;
    let version = resolve_version(
        request.version.as_deref(),
        deps.version_source.as_ref(),
        &settings.release.default_version,
    )?;
    let platform = match &request.platform {
        Some(platform) => platform.clone(),
        None => PlatformTarget::current()?,
    };
    let root = match &request.cache_root {
        Some(root) => root.clone(),
        None => CacheStore::default_root(deps.dirs.as_ref())?,
    };
    log::debug!("resolving runtime library {version} for {platform} under {root}");
    Acquisition::new(settings, deps).acquire(&CacheStore::new(root), &version, &platform)
}
