//! On-disk cache layout for installed shim libraries.
//!
//! Libraries live at `<root>/<version>/<platform>/<library>`. The lock file,
//! downloaded metadata and archive sit beside the library in the same
//! directory, so every rename stays on one filesystem.

use crate::dirs::BaseDirs;
use crate::platform::PlatformTarget;
use crate::version::ReleaseVersion;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use thiserror::Error;

/// Lock file name inside an entry directory.
pub const LOCK_FILE_NAME: &str = ".download.lock";

/// Errors arising from cache layout and installation.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No home directory is available for the default cache root.
    #[error("could not determine the home directory for the default cache root")]
    HomeUnavailable,

    /// The home directory cannot be represented as UTF-8.
    #[error("home directory is not valid UTF-8: {path}")]
    NonUtf8Home {
        /// Lossy rendering of the path.
        path: String,
    },

    /// The entry directory could not be created.
    #[error("failed to create cache directory {path}")]
    CreateDir {
        /// Directory being created.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Moving the staged library into place failed.
    #[error("failed to install {staged} as {path}")]
    Install {
        /// Staged source file.
        staged: Utf8PathBuf,
        /// Final library path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The library was not present after the rename.
    #[error("installed library {path} is missing or empty")]
    InstallVerification {
        /// Final library path.
        path: Utf8PathBuf,
    },
}

/// Root of the library cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStore {
    root: Utf8PathBuf,
}

impl CacheStore {
    /// Use `root` as the cache root.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The default root, `<home>/.cache/chroma/local_shim`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::HomeUnavailable`] or [`CacheError::NonUtf8Home`]
    /// when the home directory cannot be used.
    pub fn default_root(dirs: &dyn BaseDirs) -> Result<Utf8PathBuf, CacheError> {
        let home = dirs.home_dir().ok_or(CacheError::HomeUnavailable)?;
        let home = Utf8PathBuf::from_path_buf(home).map_err(|path| CacheError::NonUtf8Home {
            path: path.display().to_string(),
        })?;
        Ok(home.join(".cache").join("chroma").join("local_shim"))
    }

    /// The cache root.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Paths for one (version, platform) pair.
    #[must_use]
    pub fn entry(&self, version: &ReleaseVersion, platform: &PlatformTarget) -> CacheEntry {
        let dir = self
            .root
            .join(version.as_str())
            .join(platform.platform_id());
        let library = dir.join(platform.library_file_name());
        CacheEntry { dir, library }
    }
}

/// Paths belonging to one cached library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    dir: Utf8PathBuf,
    library: Utf8PathBuf,
}

impl CacheEntry {
    /// Directory holding the library, lock and downloads.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Final library path.
    #[must_use]
    pub fn library_path(&self) -> &Utf8Path {
        &self.library
    }

    /// Lock file path.
    #[must_use]
    pub fn lock_path(&self) -> Utf8PathBuf {
        self.dir.join(LOCK_FILE_NAME)
    }

    /// Path for a downloaded asset kept beside the library.
    #[must_use]
    pub fn asset_path(&self, asset_name: &str) -> Utf8PathBuf {
        self.dir.join(asset_name)
    }

    /// Path the extractor writes to before [`Self::install`].
    #[must_use]
    pub fn staging_path(&self) -> Utf8PathBuf {
        let name = self.library.file_name().unwrap_or("library");
        self.dir.join(format!(".{name}.staged"))
    }

    /// Whether the library is a non-empty regular file.
    #[must_use]
    pub fn exists(&self) -> bool {
        is_present(&self.library)
    }

    /// Create the entry directory (owner-only on unix).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CreateDir`] if creation fails.
    pub fn ensure_dir(&self) -> Result<(), CacheError> {
        create_private_dir_all(&self.dir).map_err(|source| CacheError::CreateDir {
            path: self.dir.clone(),
            source,
        })
    }

    /// Atomically move `staged` into the library path.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Install`] if the rename fails and
    /// [`CacheError::InstallVerification`] if the library is absent afterwards.
    pub fn install(&self, staged: &Utf8Path) -> Result<(), CacheError> {
        let install_error = |source| CacheError::Install {
            staged: staged.to_owned(),
            path: self.library.clone(),
            source,
        };
        match fs::remove_file(&self.library) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(install_error(err)),
        }
        fs::rename(staged, &self.library).map_err(install_error)?;
        if !self.exists() {
            return Err(CacheError::InstallVerification {
                path: self.library.clone(),
            });
        }
        log::info!("installed runtime library at {}", self.library);
        Ok(())
    }
}

/// Whether `path` is a non-empty regular file.
#[must_use]
pub fn is_present(path: &Utf8Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

#[cfg(unix)]
fn create_private_dir_all(path: &Utf8Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir_all(path: &Utf8Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirs::MockBaseDirs;
    use crate::version::VersionOrigin;
    use rstest::{fixture, rstest};
    use std::path::PathBuf;

    #[fixture]
    fn version() -> ReleaseVersion {
        ReleaseVersion::normalize("v1.2.3", VersionOrigin::Explicit)
            .expect("valid")
            .expect("set")
    }

    #[fixture]
    fn linux() -> PlatformTarget {
        PlatformTarget::new("linux", "amd64").expect("supported")
    }

    fn temp_store() -> (tempfile::TempDir, CacheStore) {
        let temp = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).expect("UTF-8");
        (temp, CacheStore::new(root))
    }

    #[rstest]
    fn entry_layout_is_deterministic(version: ReleaseVersion, linux: PlatformTarget) {
        let store = CacheStore::new("/cache");
        let entry = store.entry(&version, &linux);

        assert_eq!(
            entry.library_path(),
            Utf8Path::new("/cache/v1.2.3/linux-amd64/libchroma_shim.so")
        );
        assert_eq!(
            entry.lock_path(),
            Utf8Path::new("/cache/v1.2.3/linux-amd64/.download.lock")
        );
        assert_eq!(entry.dir(), Utf8Path::new("/cache/v1.2.3/linux-amd64"));
    }

    #[test]
    fn default_root_is_under_home() {
        let mut dirs = MockBaseDirs::new();
        dirs.expect_home_dir()
            .returning(|| Some(PathBuf::from("/home/test")));

        let root = CacheStore::default_root(&dirs).expect("root");
        assert_eq!(root, Utf8Path::new("/home/test/.cache/chroma/local_shim"));
    }

    #[test]
    fn default_root_requires_home() {
        let mut dirs = MockBaseDirs::new();
        dirs.expect_home_dir().returning(|| None);

        let err = CacheStore::default_root(&dirs).expect_err("expected failure");
        assert!(matches!(err, CacheError::HomeUnavailable));
    }

    #[rstest]
    fn empty_file_is_not_present(version: ReleaseVersion, linux: PlatformTarget) {
        let (_temp, store) = temp_store();
        let entry = store.entry(&version, &linux);
        entry.ensure_dir().expect("create dir");

        assert!(!entry.exists());
        fs::write(entry.library_path(), b"").expect("write empty");
        assert!(!entry.exists());
        fs::write(entry.library_path(), b"\x7fELF").expect("write library");
        assert!(entry.exists());
    }

    #[rstest]
    fn directory_is_not_present(version: ReleaseVersion, linux: PlatformTarget) {
        let (_temp, store) = temp_store();
        let entry = store.entry(&version, &linux);
        fs::create_dir_all(entry.library_path()).expect("create dir in place of library");

        assert!(!entry.exists());
    }

    #[rstest]
    fn install_replaces_existing_library(version: ReleaseVersion, linux: PlatformTarget) {
        let (_temp, store) = temp_store();
        let entry = store.entry(&version, &linux);
        entry.ensure_dir().expect("create dir");
        fs::write(entry.library_path(), b"old").expect("write old");
        let staged = entry.staging_path();
        fs::write(&staged, b"new").expect("write staged");

        entry.install(&staged).expect("install");

        assert_eq!(fs::read(entry.library_path()).expect("read"), b"new");
        assert!(!staged.exists());
    }

    #[rstest]
    fn install_of_empty_file_fails_verification(version: ReleaseVersion, linux: PlatformTarget) {
        let (_temp, store) = temp_store();
        let entry = store.entry(&version, &linux);
        entry.ensure_dir().expect("create dir");
        let staged = entry.staging_path();
        fs::write(&staged, b"").expect("write staged");

        let err = entry.install(&staged).expect_err("expected failure");
        assert!(matches!(err, CacheError::InstallVerification { .. }));
    }

    #[cfg(unix)]
    #[rstest]
    fn directories_are_owner_only(version: ReleaseVersion, linux: PlatformTarget) {
        use std::os::unix::fs::PermissionsExt;

        let (_temp, store) = temp_store();
        let entry = store.entry(&version, &linux);
        entry.ensure_dir().expect("create dir");

        let mode = fs::metadata(entry.dir()).expect("stat").permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
