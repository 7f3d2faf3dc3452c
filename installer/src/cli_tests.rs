//! Tests for CLI parsing and request construction.

use super::*;
use rstest::rstest;

#[test]
fn cli_parses_defaults() {
    let cli = Cli::parse_from(["shimfetch"]);
    assert_eq!(cli, Cli::default());
    assert_eq!(cli.log_level(), LevelFilter::Warn);
}

#[test]
fn cli_parses_every_option() {
    let cli = Cli::parse_from([
        "shimfetch",
        "--library-path",
        "/opt/libchroma_shim.so",
        "--version-tag",
        "v0.3.1",
        "--cache-dir",
        "/var/cache/shim",
        "--config",
        "/etc/shimfetch.toml",
        "--no-download",
    ]);

    assert_eq!(cli.library_path.as_deref(), Some("/opt/libchroma_shim.so"));
    assert_eq!(cli.version_tag.as_deref(), Some("v0.3.1"));
    assert_eq!(cli.cache_dir, Some(Utf8PathBuf::from("/var/cache/shim")));
    assert_eq!(cli.config, Some(Utf8PathBuf::from("/etc/shimfetch.toml")));
    assert!(cli.no_download);
}

#[rstest]
#[case::quiet(&["shimfetch", "-q"], LevelFilter::Error)]
#[case::info(&["shimfetch", "-v"], LevelFilter::Info)]
#[case::debug(&["shimfetch", "-vv"], LevelFilter::Debug)]
#[case::trace(&["shimfetch", "-vvvv"], LevelFilter::Trace)]
fn verbosity_maps_to_log_level(#[case] args: &[&str], #[case] expected: LevelFilter) {
    assert_eq!(Cli::parse_from(args).log_level(), expected);
}

#[test]
fn quiet_conflicts_with_verbose() {
    assert!(Cli::try_parse_from(["shimfetch", "-q", "-v"]).is_err());
}

#[test]
fn request_carries_flags_and_environment() {
    let cli = Cli::parse_from([
        "shimfetch",
        "--version-tag",
        "0.4.0",
        "--cache-dir",
        "/tmp/shim",
        "--no-download",
    ]);

    let request = cli.request(Some("/env/lib.so".to_owned()));

    assert_eq!(request.explicit_path, None);
    assert_eq!(request.env_override.as_deref(), Some("/env/lib.so"));
    assert_eq!(request.version.as_deref(), Some("0.4.0"));
    assert_eq!(request.cache_root, Some(Utf8PathBuf::from("/tmp/shim")));
    assert!(!request.auto_download);
}
