//! Directory resolution abstraction.
//!
//! The cache root defaults to a location under the user's home directory.
//! [`BaseDirs`] lets tests supply their own home without touching the real
//! environment.

use std::path::PathBuf;

/// Source of platform base directories.
#[cfg_attr(test, mockall::automock)]
pub trait BaseDirs: Send + Sync {
    /// The current user's home directory, if it can be determined.
    fn home_dir(&self) -> Option<PathBuf>;
}

/// [`BaseDirs`] backed by `directories-next`.
#[derive(Debug, Clone)]
pub struct SystemBaseDirs {
    home_dir: Option<PathBuf>,
}

impl SystemBaseDirs {
    /// Snapshot the platform directories for the current user.
    ///
    /// # Examples
    ///
    /// ```
    /// use shimfetch::dirs::{BaseDirs, SystemBaseDirs};
    ///
    /// let dirs = SystemBaseDirs::new();
    /// let _home = dirs.home_dir();
    /// ```
    #[must_use]
    pub fn new() -> Self {
        let home_dir = directories_next::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
        Self { home_dir }
    }
}

impl Default for SystemBaseDirs {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseDirs for SystemBaseDirs {
    fn home_dir(&self) -> Option<PathBuf> {
        self.home_dir.clone()
    }
}
