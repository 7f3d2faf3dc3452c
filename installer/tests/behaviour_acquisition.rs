//! Behaviour-driven tests for library acquisition.
//!
//! Each scenario builds a signed release, serves it from an in-memory
//! transport and resolves the library path through the public entry point.

use camino::Utf8PathBuf;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use shimfetch::context::Dependencies;
use shimfetch::platform::PlatformTarget;
use shimfetch::settings::Settings;
use shimfetch::test_utils::{
    ManualClock, MemoryTransport, ReleaseFixture, SignerSpec, dependencies,
};
use shimfetch::transport::Transport;
use shimfetch::{LibraryRequest, ShimError, resolve_library_path};
use std::sync::Arc;

const PRIMARY: &str = "https://primary.example/releases";
const FALLBACK: &str = "https://fallback.example/releases";

struct AcquisitionWorld {
    _temp_dir: tempfile::TempDir,
    cache_root: Utf8PathBuf,
    settings: Settings,
    transport: Arc<MemoryTransport>,
    deps: Dependencies,
    platform: PlatformTarget,
    release: Option<ReleaseFixture>,
    explicit_path: Option<String>,
    requests_before: usize,
    result: Option<Result<Utf8PathBuf, ShimError>>,
}

impl AcquisitionWorld {
    fn release(&self) -> &ReleaseFixture {
        self.release.as_ref().expect("release not configured")
    }

    fn request(&self) -> LibraryRequest {
        LibraryRequest {
            explicit_path: self.explicit_path.clone(),
            version: self.release.as_ref().map(|release| release.version.clone()),
            cache_root: Some(self.cache_root.clone()),
            platform: Some(self.platform.clone()),
            ..LibraryRequest::default()
        }
    }

    fn resolve(&self) -> Result<Utf8PathBuf, ShimError> {
        resolve_library_path(&self.request(), &self.settings, &self.deps)
    }

    fn library_path(&self) -> Utf8PathBuf {
        self.cache_root
            .join(&self.release().version)
            .join(self.platform.platform_id())
            .join(self.platform.library_file_name())
    }

    fn error(&self) -> &ShimError {
        match self.result.as_ref().expect("resolution not run") {
            Ok(path) => panic!("expected failure, resolved {path}"),
            Err(err) => err,
        }
    }
}

#[fixture]
fn world() -> AcquisitionWorld {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let cache_root =
        Utf8PathBuf::try_from(temp_dir.path().join("cache")).expect("UTF-8 path");
    let mut settings = Settings::default();
    settings.release.mirrors = vec![PRIMARY.to_owned(), FALLBACK.to_owned()];
    let transport = Arc::new(MemoryTransport::new());
    let deps = dependencies(
        &settings,
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::new(ManualClock::new()),
    );
    AcquisitionWorld {
        _temp_dir: temp_dir,
        cache_root,
        settings,
        transport,
        deps,
        platform: PlatformTarget::new("linux", "amd64").expect("supported platform"),
        release: None,
        explicit_path: None,
        requests_before: 0,
        result: None,
    }
}

fn publish(world: &mut AcquisitionWorld, version: &str, mirror: &str) {
    let release = ReleaseFixture::new(&world.settings, version, world.platform.clone());
    release.serve(&world.transport, mirror);
    world.release = Some(release);
}

#[given("a signed release \"{version}\" on the primary mirror")]
fn given_release_on_primary(world: &mut AcquisitionWorld, version: String) {
    publish(world, &version, PRIMARY);
}

#[given("a signed release \"{version}\" on the fallback mirror")]
fn given_release_on_fallback(world: &mut AcquisitionWorld, version: String) {
    publish(world, &version, FALLBACK);
}

#[given("a release \"{version}\" signed for another workflow on the primary mirror")]
fn given_release_for_other_workflow(world: &mut AcquisitionWorld, version: String) {
    let mut release = ReleaseFixture::new(&world.settings, &version, world.platform.clone());
    let mut signer = SignerSpec::for_release(&world.settings.release, &version);
    signer.identity = "https://github.com/someone/else/.github/workflows/release.yml@refs/tags/v0"
        .to_owned();
    release.signed = signer.sign(&release.manifest);
    release.serve(&world.transport, PRIMARY);
    world.release = Some(release);
}

#[given("the primary mirror answers 500 for the manifest")]
fn given_primary_manifest_error(world: &mut AcquisitionWorld) {
    let url = world.release().url(PRIMARY, "SHA256SUMS");
    world.transport.serve_status(&url, 500);
}

#[given("the primary mirror serves a tampered archive")]
fn given_tampered_archive(world: &mut AcquisitionWorld) {
    let url = world.release().url(PRIMARY, &world.release().archive_name);
    world.transport.serve(&url, b"tampered archive".to_vec());
}

#[given("the library is already cached")]
fn given_library_cached(world: &mut AcquisitionWorld) {
    world.resolve().expect("initial resolution");
    world.requests_before = world.transport.total_requests();
}

#[given("an explicit library path \"{path}\"")]
fn given_explicit_path(world: &mut AcquisitionWorld, path: String) {
    world.explicit_path = Some(path);
}

#[when("the library path is resolved")]
fn when_resolved(world: &mut AcquisitionWorld) {
    world.result = Some(world.resolve());
}

#[then("the library is installed in the cache")]
fn then_library_installed(world: &mut AcquisitionWorld) {
    let expected = world.library_path();
    let resolved = match world.result.as_ref().expect("resolution not run") {
        Ok(path) => path.clone(),
        Err(err) => panic!("resolution failed: {}", err.error_chain()),
    };
    assert_eq!(resolved, expected);
    assert_eq!(
        std::fs::read(&resolved).expect("read library"),
        world.release().library
    );
}

#[then("the archive was downloaded {count} time from the primary mirror")]
fn then_archive_downloads_primary(world: &mut AcquisitionWorld, count: usize) {
    let url = world.release().url(PRIMARY, &world.release().archive_name);
    assert_eq!(world.transport.requests(&url), count);
}

#[then("the archive was downloaded {count} time from the fallback mirror")]
fn then_archive_downloads_fallback(world: &mut AcquisitionWorld, count: usize) {
    let url = world.release().url(FALLBACK, &world.release().archive_name);
    assert_eq!(world.transport.requests(&url), count);
}

#[then("no further network requests were made")]
fn then_no_further_requests(world: &mut AcquisitionWorld) {
    assert_eq!(world.transport.total_requests(), world.requests_before);
}

#[then("the failure is classified as \"{kind}\"")]
fn then_failure_kind(world: &mut AcquisitionWorld, kind: String) {
    assert_eq!(world.error().kind().to_string(), kind);
}

#[then("the library is not installed")]
fn then_library_not_installed(world: &mut AcquisitionWorld) {
    assert!(!world.library_path().exists());
}

#[then("the resolved path is \"{path}\"")]
fn then_resolved_path(world: &mut AcquisitionWorld, path: String) {
    match world.result.as_ref().expect("resolution not run") {
        Ok(resolved) => assert_eq!(resolved.as_str(), path),
        Err(err) => panic!("resolution failed: {}", err.error_chain()),
    }
}

#[scenario(
    path = "tests/features/acquisition.feature",
    name = "Fresh cache downloads and installs the library"
)]
fn scenario_fresh_cache(world: AcquisitionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/acquisition.feature",
    name = "Cached library resolves without network access"
)]
fn scenario_cached_library(world: AcquisitionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/acquisition.feature",
    name = "Primary mirror failure falls back to the next mirror"
)]
fn scenario_mirror_fallback(world: AcquisitionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/acquisition.feature",
    name = "Certificate for another workflow is rejected"
)]
fn scenario_wrong_workflow(world: AcquisitionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/acquisition.feature",
    name = "Tampered archive is rejected"
)]
fn scenario_tampered_archive(world: AcquisitionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/acquisition.feature",
    name = "Explicit path bypasses the download"
)]
fn scenario_explicit_path(world: AcquisitionWorld) {
    let _ = world;
}
