//! Cross-process download lock with heartbeat and stale-lock eviction.
//!
//! Exclusion is two-layered. Threads of one process queue on a process-wide
//! registry of held lock paths; processes race on exclusive creation of the
//! lock file. The holder refreshes the file's modification time from a
//! heartbeat thread, and waiters only evict a lock whose age exceeds the
//! stale threshold and whose identity is unchanged across two observations.
//!
//! Exclusive creation is not reliable on network filesystems; the cache root
//! should live on local storage.

use crate::context::Clock;
use crate::settings::DownloadSettings;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, LazyLock, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;

/// Lock paths held by threads of this process.
static HELD_LOCKS: LazyLock<(Mutex<HashSet<Utf8PathBuf>>, Condvar)> =
    LazyLock::new(|| (Mutex::new(HashSet::new()), Condvar::new()));

/// Errors arising from lock acquisition and release.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was not obtained within the wait timeout.
    #[error("timed out after {waited:?} waiting for download lock {path}")]
    Timeout {
        /// Lock file path.
        path: Utf8PathBuf,
        /// Configured wait.
        waited: Duration,
    },

    /// The lock file could not be created or written.
    #[error("failed to create download lock {path}")]
    Create {
        /// Lock file path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An existing lock file could not be inspected or evicted.
    #[error("failed to inspect existing download lock {path}")]
    Inspect {
        /// Lock file path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The heartbeat thread could not be started.
    #[error("failed to start heartbeat for download lock {path}")]
    Heartbeat {
        /// Lock file path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// One or more cleanup steps failed during release.
    #[error("failed to release download lock {path}: {}", render_errors(.errors))]
    Release {
        /// Lock file path.
        path: Utf8PathBuf,
        /// Every error from heartbeat stop, sync and removal.
        errors: Vec<io::Error>,
    },
}

impl LockError {
    /// Lock file the error refers to.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        match self {
            Self::Timeout { path, .. }
            | Self::Create { path, .. }
            | Self::Inspect { path, .. }
            | Self::Heartbeat { path, .. }
            | Self::Release { path, .. } => path,
        }
    }
}

fn render_errors(errors: &[io::Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Timing bounds for [`DownloadLock::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// Maximum time to wait for the lock.
    pub wait: Duration,
    /// Age after which an unrefreshed lock may be evicted.
    pub stale: Duration,
    /// Interval between modification-time refreshes.
    pub heartbeat: Duration,
    /// Delay between creation attempts.
    pub poll: Duration,
}

impl From<&DownloadSettings> for LockConfig {
    fn from(settings: &DownloadSettings) -> Self {
        Self {
            wait: settings.lock_wait(),
            stale: settings.lock_stale(),
            heartbeat: settings.heartbeat(),
            poll: settings.lock_poll(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::from(&DownloadSettings::default())
    }
}

/// A held download lock.
///
/// Call [`Self::release`] to observe cleanup errors. Dropping an unreleased
/// lock performs the same cleanup and logs failures.
#[derive(Debug)]
pub struct DownloadLock {
    path: Utf8PathBuf,
    file: Option<File>,
    heartbeat: Option<Heartbeat>,
    guard: Option<ProcessGuard>,
}

impl DownloadLock {
    /// Acquire the lock at `path`, blocking up to `config.wait` in total.
    ///
    /// The in-process wait is measured in real time because it blocks on a
    /// condition variable; the remainder of the budget bounds the lock file
    /// wait, which is measured with `clock`. The heartbeat stamps the lock
    /// file with `clock` time so eviction compares like with like. A wait too
    /// large to represent as a deadline never times out.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] when the wait elapses, or another
    /// [`LockError`] if the filesystem refuses an operation.
    pub fn acquire(
        path: &Utf8Path,
        config: &LockConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LockError> {
        let started = Instant::now();
        let guard = ProcessGuard::acquire(path, config.wait)?;
        let remaining = config.wait.saturating_sub(started.elapsed());
        let file = acquire_file(path, config, remaining, clock.as_ref())?;
        let mut lock = Self {
            path: path.to_owned(),
            file: Some(file),
            heartbeat: None,
            guard: Some(guard),
        };
        let heartbeat =
            Heartbeat::start(path.to_owned(), config.heartbeat, clock).map_err(|source| {
                LockError::Heartbeat {
                    path: path.to_owned(),
                    source,
                }
            })?;
        lock.heartbeat = Some(heartbeat);
        log::debug!("acquired download lock {path}");
        Ok(lock)
    }

    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Stop the heartbeat, close and remove the lock file.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Release`] carrying every cleanup failure.
    pub fn release(mut self) -> Result<(), LockError> {
        let errors = self.cleanup();
        if errors.is_empty() {
            log::debug!("released download lock {}", self.path);
            Ok(())
        } else {
            Err(LockError::Release {
                path: self.path.clone(),
                errors,
            })
        }
    }

    fn cleanup(&mut self) -> Vec<io::Error> {
        let mut errors = Vec::new();
        if let Some(heartbeat) = self.heartbeat.take()
            && let Err(err) = heartbeat.stop()
        {
            errors.push(err);
        }
        if let Some(file) = self.file.take() {
            if let Err(err) = file.sync_all() {
                errors.push(err);
            }
            drop(file);
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => errors.push(err),
            }
        }
        self.guard.take();
        errors
    }
}

impl Drop for DownloadLock {
    fn drop(&mut self) {
        for err in self.cleanup() {
            log::warn!("failed to clean up download lock {}: {err}", self.path);
        }
    }
}

/// Membership of a path in [`HELD_LOCKS`].
#[derive(Debug)]
struct ProcessGuard {
    path: Utf8PathBuf,
}

impl ProcessGuard {
    fn acquire(path: &Utf8Path, wait: Duration) -> Result<Self, LockError> {
        let (held, released) = &*HELD_LOCKS;
        let deadline = Instant::now().checked_add(wait);
        let mut set = held.lock().unwrap_or_else(PoisonError::into_inner);
        while set.contains(path) {
            let Some(deadline) = deadline else {
                set = released.wait(set).unwrap_or_else(PoisonError::into_inner);
                continue;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LockError::Timeout {
                    path: path.to_owned(),
                    waited: wait,
                });
            }
            set = released
                .wait_timeout(set, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        set.insert(path.to_owned());
        Ok(Self {
            path: path.to_owned(),
        })
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let (held, released) = &*HELD_LOCKS;
        let mut set = held.lock().unwrap_or_else(PoisonError::into_inner);
        set.remove(&self.path);
        released.notify_all();
    }
}

/// Create the lock file, polling and evicting stale locks for up to `wait`.
fn acquire_file(
    path: &Utf8Path,
    config: &LockConfig,
    wait: Duration,
    clock: &dyn Clock,
) -> Result<File, LockError> {
    let deadline = clock.now().checked_add(wait);
    loop {
        match create_lock_file(path) {
            Ok(file) => return Ok(file),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(source) => {
                return Err(LockError::Create {
                    path: path.to_owned(),
                    source,
                });
            }
        }
        if evict_if_stale(path, config.stale, clock)? {
            continue;
        }
        if deadline.is_some_and(|deadline| clock.now() >= deadline) {
            return Err(LockError::Timeout {
                path: path.to_owned(),
                waited: config.wait,
            });
        }
        clock.sleep(config.poll);
    }
}

fn create_lock_file(path: &Utf8Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    let written = writeln!(file, "{}", std::process::id()).and_then(|()| file.sync_all());
    if let Err(err) = written {
        drop(file);
        if let Err(remove_err) = fs::remove_file(path) {
            log::warn!("failed to remove partially written lock {path}: {remove_err}");
        }
        return Err(err);
    }
    Ok(file)
}

/// Remove the lock at `path` if it is stale and unchanged.
///
/// Returns `true` when the caller should retry creation immediately: either
/// the lock was evicted or it vanished between observations.
fn evict_if_stale(path: &Utf8Path, stale: Duration, clock: &dyn Clock) -> Result<bool, LockError> {
    let inspect_error = |source| LockError::Inspect {
        path: path.to_owned(),
        source,
    };
    let Some(first) = observe(path).map_err(inspect_error)? else {
        return Ok(true);
    };
    let age = clock
        .now()
        .duration_since(first.modified)
        .unwrap_or(Duration::ZERO);
    if age <= stale {
        return Ok(false);
    }
    let Some(second) = observe(path).map_err(inspect_error)? else {
        return Ok(true);
    };
    if first != second {
        return Ok(false);
    }
    match fs::remove_file(path) {
        Ok(()) => {
            log::warn!("evicted stale download lock {path} (unrefreshed for {age:?})");
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(err) => Err(inspect_error(err)),
    }
}

/// Observable identity of a lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LockIdentity {
    modified: SystemTime,
    len: u64,
    #[cfg(unix)]
    device: u64,
    #[cfg(unix)]
    inode: u64,
}

impl LockIdentity {
    fn from_metadata(meta: &Metadata) -> io::Result<Self> {
        #[cfg(unix)]
        use std::os::unix::fs::MetadataExt;

        Ok(Self {
            modified: meta.modified()?,
            len: meta.len(),
            #[cfg(unix)]
            device: meta.dev(),
            #[cfg(unix)]
            inode: meta.ino(),
        })
    }
}

fn observe(path: &Utf8Path) -> io::Result<Option<LockIdentity>> {
    match fs::metadata(path) {
        Ok(meta) => LockIdentity::from_metadata(&meta).map(Some),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Background refresh of the lock file's modification time.
#[derive(Debug)]
struct Heartbeat {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<io::Result<()>>,
}

impl Heartbeat {
    fn start(path: Utf8PathBuf, interval: Duration, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("shimfetch-lock-heartbeat".to_owned())
            .spawn(move || beat(&path, interval, clock.as_ref(), &stopped))?;
        Ok(Self { stop, handle })
    }

    fn stop(self) -> io::Result<()> {
        let Self { stop, handle } = self;
        drop(stop);
        handle
            .join()
            .map_err(|_| io::Error::other("lock heartbeat thread panicked"))?
    }
}

fn beat(
    path: &Utf8Path,
    interval: Duration,
    clock: &dyn Clock,
    stopped: &mpsc::Receiver<()>,
) -> io::Result<()> {
    loop {
        match stopped.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
        match touch(path, clock.now()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::debug!("download lock {path} disappeared; stopping heartbeat");
                return Ok(());
            }
            Err(err) => return Err(err),
        }
    }
}

fn touch(path: &Utf8Path, now: SystemTime) -> io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_modified(now)
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
