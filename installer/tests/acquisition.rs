//! End-to-end resolution against an in-memory release host.
//!
//! These tests drive `resolve_library_path` with the real verifier, lock,
//! extractor and cache, replacing only the network and the clock.

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use shimfetch::context::Dependencies;
use shimfetch::platform::PlatformTarget;
use shimfetch::settings::Settings;
use shimfetch::test_utils::{ManualClock, MemoryTransport, ReleaseFixture, dependencies};
use shimfetch::transport::Transport;
use shimfetch::{ErrorKind, LibraryRequest, resolve_library_path};
use std::sync::{Arc, Barrier};
use tempfile::TempDir;

const PRIMARY: &str = "https://primary.example/releases";
const FALLBACK: &str = "https://fallback.example/releases";

struct Host {
    _dir: TempDir,
    root: Utf8PathBuf,
    settings: Settings,
    transport: Arc<MemoryTransport>,
    deps: Dependencies,
    release: ReleaseFixture,
}

impl Host {
    fn request(&self) -> LibraryRequest {
        LibraryRequest {
            version: Some("v1.2.3".to_owned()),
            cache_root: Some(self.root.clone()),
            platform: Some(self.release.platform.clone()),
            ..LibraryRequest::default()
        }
    }

    fn resolve(&self) -> shimfetch::Result<Utf8PathBuf> {
        resolve_library_path(&self.request(), &self.settings, &self.deps)
    }

    fn archive_requests(&self, mirror: &str) -> usize {
        self.transport
            .requests(&self.release.url(mirror, &self.release.archive_name))
    }
}

#[fixture]
fn host() -> Host {
    let dir = tempfile::tempdir().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(dir.path().join("cache")).expect("utf8 temp dir");
    let mut settings = Settings::default();
    settings.release.mirrors = vec![PRIMARY.to_owned(), FALLBACK.to_owned()];
    let transport = Arc::new(MemoryTransport::new());
    let deps = dependencies(
        &settings,
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::new(ManualClock::new()),
    );
    let platform = PlatformTarget::new("linux", "amd64").expect("supported platform");
    let release = ReleaseFixture::new(&settings, "v1.2.3", platform);
    Host {
        _dir: dir,
        root,
        settings,
        transport,
        deps,
        release,
    }
}

#[rstest]
fn fresh_cache_installs_byte_identical_library(host: Host) {
    host.release.serve(&host.transport, PRIMARY);

    let path = host.resolve().expect("resolve");

    assert_eq!(
        path,
        host.root.join("v1.2.3").join("linux-amd64").join("libchroma_shim.so")
    );
    assert_eq!(std::fs::read(&path).expect("read library"), host.release.library);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o077, 0, "library mode {mode:o} is not owner-only");
    }
}

#[rstest]
fn cache_hit_makes_no_network_calls(host: Host) {
    host.release.serve(&host.transport, PRIMARY);
    host.resolve().expect("first resolve");
    let requests = host.transport.total_requests();

    let path = host.resolve().expect("second resolve");

    assert!(path.is_file());
    assert_eq!(host.transport.total_requests(), requests);
}

#[rstest]
fn primary_manifest_error_falls_back_to_the_next_mirror(host: Host) {
    host.transport
        .serve_status(&host.release.url(PRIMARY, "SHA256SUMS"), 500);
    host.release.serve(&host.transport, FALLBACK);

    let path = host.resolve().expect("resolve from fallback");

    assert_eq!(std::fs::read(path).expect("read library"), host.release.library);
    assert_eq!(host.archive_requests(PRIMARY), 0);
    assert_eq!(host.archive_requests(FALLBACK), 1);
}

#[rstest]
fn concurrent_resolutions_download_once(host: Host) {
    host.release.serve(&host.transport, PRIMARY);
    let barrier = Barrier::new(2);

    let paths: Vec<Utf8PathBuf> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    host.resolve()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .expect("resolver thread panicked")
                    .expect("resolve")
            })
            .collect()
    });

    assert_eq!(paths[0], paths[1]);
    assert_eq!(host.archive_requests(PRIMARY), 1);
    assert_eq!(
        host.transport.requests(&host.release.url(PRIMARY, "SHA256SUMS")),
        1
    );
    assert!(!host.root.join("v1.2.3/linux-amd64/.download.lock").exists());
}

#[rstest]
fn unsigned_release_is_never_installed(host: Host) {
    let mut release = host.release.clone();
    release.signed.signature = b"AAAA".to_vec();
    release.serve(&host.transport, PRIMARY);

    let err = host.resolve().expect_err("bad signature");

    assert_eq!(err.kind(), ErrorKind::Provenance);
    assert!(
        err.error_chain()
            .starts_with("could not resolve library path: provenance verification failed")
    );
    assert!(!host.root.join("v1.2.3/linux-amd64/libchroma_shim.so").exists());
}
