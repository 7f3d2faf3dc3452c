//! Extraction of the library from a gzip-compressed tar archive.
//!
//! Only one entry is ever written: the first regular file whose basename
//! matches the requested name. Entry paths are never joined onto the
//! destination, so traversal components inside the archive have no effect.

use camino::Utf8Path;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, Read};
use thiserror::Error;

/// Errors arising from archive extraction.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The archive could not be opened.
    #[error("failed to open archive {path}")]
    Open {
        /// Archive path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The archive is not a readable gzip-compressed tar stream.
    #[error("archive {path} is not a valid gzip-compressed tar")]
    Corrupt {
        /// Archive path.
        path: String,
        /// Underlying decoding error.
        #[source]
        source: io::Error,
    },

    /// The archive holds no entries at all.
    #[error("archive {path} contains no entries")]
    Empty {
        /// Archive path.
        path: String,
    },

    /// No regular file with the requested basename exists.
    #[error("{entry} not found in archive {path}")]
    NotFound {
        /// Requested basename.
        entry: String,
        /// Archive path.
        path: String,
    },

    /// The entry header declares a size outside `(0, limit]`.
    #[error("archive entry {entry} declares {size} bytes (allowed 1 to {limit})")]
    EntrySize {
        /// Requested basename.
        entry: String,
        /// Declared size.
        size: u64,
        /// Configured ceiling.
        limit: u64,
    },

    /// Fewer or more bytes were extracted than the header declared.
    #[error("archive entry {entry} declared {expected} bytes but {written} were extracted")]
    SizeMismatch {
        /// Requested basename.
        entry: String,
        /// Declared size.
        expected: u64,
        /// Bytes written.
        written: u64,
    },

    /// Writing the extracted file failed.
    #[error("failed to write extracted file {path}")]
    Write {
        /// Destination path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl ExtractionError {
    /// Whether the failure says something about the archive's contents
    /// rather than the local filesystem.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        !matches!(self, Self::Open { .. } | Self::Write { .. })
    }
}

type Archive = tar::Archive<GzDecoder<File>>;

fn open(path: &Utf8Path) -> Result<Archive, ExtractionError> {
    let file = File::open(path).map_err(|source| ExtractionError::Open {
        path: path.to_string(),
        source,
    })?;
    Ok(tar::Archive::new(GzDecoder::new(file)))
}

fn corrupt(path: &Utf8Path) -> impl Fn(io::Error) -> ExtractionError + '_ {
    move |source| ExtractionError::Corrupt {
        path: path.to_string(),
        source,
    }
}

/// Read the first header to confirm the file is a non-empty tar+gzip.
fn confirm_structure(path: &Utf8Path) -> Result<(), ExtractionError> {
    let mut archive = open(path)?;
    let mut entries = archive.entries().map_err(corrupt(path))?;
    match entries.next() {
        Some(Ok(_)) => Ok(()),
        Some(Err(source)) => Err(corrupt(path)(source)),
        None => Err(ExtractionError::Empty {
            path: path.to_string(),
        }),
    }
}

/// Extract the first regular file named `entry_name` from `archive` to
/// `dest`, returning the number of bytes written.
///
/// The content goes to a temporary file beside `dest`, which is synced,
/// made owner-only on unix and renamed over `dest`. Nothing is left behind
/// on failure.
///
/// # Errors
///
/// Returns [`ExtractionError`] if the archive is corrupt or empty, holds no
/// matching entry, declares a size outside `(0, max_bytes]`, or yields a
/// different number of bytes than declared, and on local I/O failures.
pub fn extract(
    archive: &Utf8Path,
    entry_name: &str,
    dest: &Utf8Path,
    max_bytes: u64,
) -> Result<u64, ExtractionError> {
    confirm_structure(archive)?;

    let mut tar = open(archive)?;
    for entry in tar.entries().map_err(corrupt(archive))? {
        let mut entry = entry.map_err(corrupt(archive))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .map_err(corrupt(archive))?
            .file_name()
            .is_some_and(|name| name == entry_name);
        if !matches {
            continue;
        }

        let size = entry.header().size().map_err(corrupt(archive))?;
        if size == 0 || size > max_bytes {
            return Err(ExtractionError::EntrySize {
                entry: entry_name.to_owned(),
                size,
                limit: max_bytes,
            });
        }
        let written = write_entry(&mut entry, archive, dest, max_bytes)?;
        if written != size {
            return Err(ExtractionError::SizeMismatch {
                entry: entry_name.to_owned(),
                expected: size,
                written,
            });
        }
        log::debug!("extracted {entry_name} from {archive} to {dest} ({written} bytes)");
        return Ok(written);
    }

    Err(ExtractionError::NotFound {
        entry: entry_name.to_owned(),
        path: archive.to_string(),
    })
}

fn write_entry(
    entry: &mut impl Read,
    archive: &Utf8Path,
    dest: &Utf8Path,
    max_bytes: u64,
) -> Result<u64, ExtractionError> {
    let write_error = |source| ExtractionError::Write {
        path: dest.to_string(),
        source,
    };
    let dir = dest.parent().unwrap_or(Utf8Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".shimfetch-")
        .suffix(".extract")
        .tempfile_in(dir)
        .map_err(write_error)?;

    let mut limited = entry.take(max_bytes.saturating_add(1));
    let written = io::copy(&mut limited, temp.as_file_mut()).map_err(corrupt(archive))?;
    if written > max_bytes {
        return Err(ExtractionError::EntrySize {
            entry: dest.file_name().unwrap_or_default().to_owned(),
            size: written,
            limit: max_bytes,
        });
    }
    temp.as_file().sync_all().map_err(write_error)?;
    restrict_permissions(temp.as_file()).map_err(write_error)?;
    temp.persist(dest).map_err(|err| write_error(err.error))?;
    Ok(written)
}

#[cfg(unix)]
fn restrict_permissions(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    file.set_permissions(std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &File) -> io::Result<()> {
    Ok(())
}
