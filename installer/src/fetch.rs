//! Retried, size-capped, atomic download of one release asset.

use crate::context::Clock;
use crate::mirror::Mirror;
use crate::transport::{Transport, TransportError};
use crate::version::ReleaseVersion;
use camino::Utf8Path;
use std::io::{self, Read};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors arising from downloading an asset.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The asset URL could not be built.
    #[error("invalid URL for asset {asset}")]
    Url {
        /// Asset name.
        asset: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },

    /// The request did not produce a response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a non-200 status.
    #[error("unexpected HTTP status {status} for {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// Status received.
        status: u16,
    },

    /// The body is larger than the ceiling.
    #[error("{url} exceeds the {limit}-byte limit")]
    TooLarge {
        /// Requested URL.
        url: String,
        /// Configured ceiling.
        limit: u64,
    },

    /// Fewer or more bytes arrived than `Content-Length` declared.
    #[error("incomplete download of {url}: expected {expected} bytes, received {received}")]
    Incomplete {
        /// Requested URL.
        url: String,
        /// Declared length.
        expected: u64,
        /// Bytes written.
        received: u64,
    },

    /// Reading the body or writing the temp file failed mid-transfer.
    #[error("transfer of {url} failed")]
    Transfer {
        /// Requested URL.
        url: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The downloaded file could not be committed.
    #[error("failed to write {path}")]
    Write {
        /// Destination path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Every attempt failed; carries the last failure.
    #[error("download of {url} failed after {attempts} attempt(s)")]
    Exhausted {
        /// Requested URL.
        url: String,
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        #[source]
        source: Box<FetchError>,
    },
}

/// Downloads assets from a mirror with retry and linear backoff.
pub struct ReleaseFetcher<'a> {
    transport: &'a dyn Transport,
    clock: &'a dyn Clock,
    attempts: u32,
    backoff: Duration,
}

impl<'a> ReleaseFetcher<'a> {
    /// Create a fetcher making up to `attempts` tries per asset and sleeping
    /// `attempt × backoff` between them.
    #[must_use]
    pub fn new(
        transport: &'a dyn Transport,
        clock: &'a dyn Clock,
        attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            transport,
            clock,
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Download `<mirror>/<version>/<asset>` to `dest`.
    ///
    /// The body is written to a temporary file beside `dest`, synced, and
    /// renamed over `dest`. Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Url`] if the URL cannot be built and
    /// [`FetchError::Exhausted`] wrapping the last failure once every attempt
    /// has failed.
    pub fn fetch(
        &self,
        mirror: &Mirror,
        version: &ReleaseVersion,
        asset: &str,
        dest: &Utf8Path,
        max_bytes: u64,
    ) -> Result<u64, FetchError> {
        let url = mirror
            .asset_url(version, asset)
            .map_err(|source| FetchError::Url {
                asset: asset.to_owned(),
                source,
            })?;
        let mut attempt = 1;
        loop {
            match self.download_once(&url, dest, max_bytes) {
                Ok(bytes) => {
                    log::debug!("downloaded {url} ({bytes} bytes)");
                    return Ok(bytes);
                }
                Err(err) if attempt < self.attempts => {
                    log::debug!(
                        "attempt {attempt}/{} for {url} failed: {err}",
                        self.attempts
                    );
                    self.clock.sleep(self.backoff.saturating_mul(attempt));
                    attempt += 1;
                }
                Err(err) => {
                    return Err(FetchError::Exhausted {
                        url: url.to_string(),
                        attempts: self.attempts,
                        source: Box::new(err),
                    });
                }
            }
        }
    }

    fn download_once(&self, url: &Url, dest: &Utf8Path, max_bytes: u64) -> Result<u64, FetchError> {
        let response = self.transport.get(url)?;
        if response.status != 200 {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }
        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit: max_bytes,
        };
        if response.content_length.is_some_and(|len| len > max_bytes) {
            return Err(too_large());
        }

        let write_error = |source| FetchError::Write {
            path: dest.to_string(),
            source,
        };
        let dir = dest.parent().unwrap_or(Utf8Path::new("."));
        let mut temp = tempfile::Builder::new()
            .prefix(".shimfetch-")
            .suffix(".part")
            .tempfile_in(dir)
            .map_err(write_error)?;
        let mut limited = response.body.take(max_bytes.saturating_add(1));
        let received =
            io::copy(&mut limited, temp.as_file_mut()).map_err(|source| FetchError::Transfer {
                url: url.to_string(),
                source,
            })?;
        if received > max_bytes {
            return Err(too_large());
        }
        if let Some(expected) = response.content_length
            && received != expected
        {
            return Err(FetchError::Incomplete {
                url: url.to_string(),
                expected,
                received,
            });
        }
        temp.as_file().sync_all().map_err(write_error)?;
        temp.persist(dest).map_err(|err| write_error(err.error))?;
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ManualClock;
    use crate::transport::{HttpResponse, MockTransport};
    use crate::version::VersionOrigin;
    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};
    use std::fs;
    use tempfile::TempDir;

    struct Scene {
        _temp: TempDir,
        dest: Utf8PathBuf,
        mirror: Mirror,
        version: ReleaseVersion,
        clock: ManualClock,
    }

    impl Scene {
        fn fetch(&self, transport: &MockTransport, max_bytes: u64) -> Result<u64, FetchError> {
            ReleaseFetcher::new(transport, &self.clock, 3, Duration::from_secs(1)).fetch(
                &self.mirror,
                &self.version,
                "SHA256SUMS",
                &self.dest,
                max_bytes,
            )
        }

        fn leftovers(&self) -> Vec<String> {
            let dir = self.dest.parent().expect("parent");
            fs::read_dir(dir)
                .expect("list dir")
                .map(|entry| {
                    entry
                        .expect("entry")
                        .file_name()
                        .to_string_lossy()
                        .into_owned()
                })
                .collect()
        }
    }

    #[fixture]
    fn scene() -> Scene {
        let temp = tempfile::tempdir().expect("temp dir");
        let dir = Utf8PathBuf::try_from(temp.path().to_path_buf()).expect("UTF-8");
        Scene {
            dest: dir.join("SHA256SUMS"),
            _temp: temp,
            mirror: Mirror::parse("https://mirror.example/releases").expect("mirror"),
            version: ReleaseVersion::normalize("v1.2.3", VersionOrigin::Explicit)
                .expect("valid")
                .expect("set"),
            clock: ManualClock::new(),
        }
    }

    fn response(status: u16, body: &'static [u8], content_length: Option<u64>) -> HttpResponse {
        HttpResponse {
            status,
            content_length,
            body: Box::new(body),
        }
    }

    #[rstest]
    fn downloads_to_destination(scene: Scene) {
        let mut transport = MockTransport::new();
        transport
            .expect_get()
            .withf(|url| url.as_str() == "https://mirror.example/releases/v1.2.3/SHA256SUMS")
            .times(1)
            .returning(|_| Ok(response(200, b"payload", Some(7))));

        let bytes = scene.fetch(&transport, 1024).expect("fetch");

        assert_eq!(bytes, 7);
        assert_eq!(fs::read(&scene.dest).expect("read"), b"payload");
        assert_eq!(scene.leftovers(), ["SHA256SUMS"]);
        assert_eq!(scene.clock.slept(), Duration::ZERO);
    }

    #[rstest]
    fn server_errors_are_retried_with_linear_backoff(scene: Scene) {
        let mut transport = MockTransport::new();
        transport
            .expect_get()
            .times(3)
            .returning(|_| Ok(response(500, b"", Some(0))));

        let err = scene.fetch(&transport, 1024).expect_err("expected failure");

        let FetchError::Exhausted {
            attempts, source, ..
        } = err
        else {
            panic!("expected retries to be exhausted");
        };
        assert_eq!(attempts, 3);
        assert!(matches!(*source, FetchError::Status { status: 500, .. }));
        assert_eq!(scene.clock.slept(), Duration::from_secs(3));
        assert!(scene.leftovers().is_empty());
    }

    #[rstest]
    fn oversized_backoff_saturates(scene: Scene) {
        let mut transport = MockTransport::new();
        transport
            .expect_get()
            .times(3)
            .returning(|_| Ok(response(503, b"", Some(0))));

        let err = ReleaseFetcher::new(&transport, &scene.clock, 3, Duration::MAX)
            .fetch(&scene.mirror, &scene.version, "SHA256SUMS", &scene.dest, 1024)
            .expect_err("expected failure");

        assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
        assert_eq!(scene.clock.slept(), Duration::MAX);
    }

    #[rstest]
    fn transient_transport_failure_recovers(scene: Scene) {
        let mut transport = MockTransport::new();
        let mut calls = 0;
        transport.expect_get().times(2).returning(move |url| {
            calls += 1;
            if calls == 1 {
                Err(TransportError::Request {
                    url: url.to_string(),
                    reason: "connection reset".to_owned(),
                })
            } else {
                Ok(response(200, b"payload", None))
            }
        });

        scene.fetch(&transport, 1024).expect("fetch");

        assert_eq!(scene.clock.slept(), Duration::from_secs(1));
    }

    #[rstest]
    fn declared_length_over_ceiling_is_rejected(scene: Scene) {
        let mut transport = MockTransport::new();
        transport
            .expect_get()
            .returning(|_| Ok(response(200, b"payload", Some(4096))));

        let err = scene.fetch(&transport, 1024).expect_err("expected failure");

        assert!(matches!(
            err,
            FetchError::Exhausted { ref source, .. } if matches!(**source, FetchError::TooLarge { limit: 1024, .. })
        ));
        assert!(!scene.dest.exists());
    }

    #[rstest]
    fn undeclared_body_over_ceiling_is_rejected(scene: Scene) {
        let mut transport = MockTransport::new();
        transport
            .expect_get()
            .returning(|_| Ok(response(200, b"0123456789", None)));

        let err = scene.fetch(&transport, 4).expect_err("expected failure");

        assert!(matches!(
            err,
            FetchError::Exhausted { ref source, .. } if matches!(**source, FetchError::TooLarge { .. })
        ));
        assert!(scene.leftovers().is_empty());
    }

    #[rstest]
    fn short_body_is_incomplete(scene: Scene) {
        let mut transport = MockTransport::new();
        transport
            .expect_get()
            .returning(|_| Ok(response(200, b"abc", Some(10))));

        let err = scene.fetch(&transport, 1024).expect_err("expected failure");

        assert!(matches!(
            err,
            FetchError::Exhausted { ref source, .. }
                if matches!(**source, FetchError::Incomplete { expected: 10, received: 3, .. })
        ));
        assert!(scene.leftovers().is_empty());
    }

    #[rstest]
    fn replaces_an_existing_destination(scene: Scene) {
        fs::write(&scene.dest, b"stale").expect("write stale");
        let mut transport = MockTransport::new();
        transport
            .expect_get()
            .returning(|_| Ok(response(200, b"fresh", Some(5))));

        scene.fetch(&transport, 1024).expect("fetch");

        assert_eq!(fs::read(&scene.dest).expect("read"), b"fresh");
    }
}
