//! Verified download and caching of the local runtime shim library.
//!
//! `shimfetch` hands back the path of a native library that is either
//! supplied by the caller or downloaded from a release mirror, checked
//! against a signed checksum manifest and installed into a per-user cache.
//! Concurrent processes share the cache through a per-entry lock file.
//!
//! # Modules
//!
//! - [`cache`] - Cache layout, presence checks and atomic install
//! - [`cli`] - Command-line argument definitions
//! - [`context`] - Injected collaborators (clock, transport, verifier)
//! - [`digest`] - SHA-256 digest values
//! - [`dirs`] - Home directory lookup
//! - [`error`] - Top-level error type and failure classes
//! - [`extract`] - Single-entry extraction from tar+gzip archives
//! - [`fetch`] - Retried, size-capped asset downloads
//! - [`lock`] - Cross-process download lock with heartbeat
//! - [`manifest`] - `SHA256SUMS` lookup and file verification
//! - [`mirror`] - Release mirror validation
//! - [`pipeline`] - The acquisition state machine
//! - [`platform`] - Supported (OS, architecture) targets
//! - [`provenance`] - Certificate and signature checks on the manifest
//! - [`resolve`] - Library path resolution entry point
//! - [`settings`] - TOML-loadable settings
//! - [`transport`] - HTTP transport with redirect policy
//! - [`version`] - Release tag selection and normalization

pub mod cache;
pub mod cli;
pub mod context;
pub mod digest;
pub mod dirs;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod lock;
pub mod manifest;
pub mod mirror;
pub mod pipeline;
pub mod platform;
pub mod provenance;
pub mod resolve;
pub mod settings;
pub mod transport;
pub mod version;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

pub use error::{ErrorKind, Result, ShimError};
pub use resolve::{LibraryRequest, resolve_library_path};
