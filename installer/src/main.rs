//! `shimfetch` CLI entrypoint.
//!
//! Prints the path of a verified runtime shim library on stdout, downloading
//! it into the cache when needed.

use camino::Utf8PathBuf;
use clap::Parser;
use shimfetch::cli::Cli;
use shimfetch::context::Dependencies;
use shimfetch::error::{Result, ShimError};
use shimfetch::resolve::{LIB_PATH_ENV, resolve_library_path};
use shimfetch::settings::Settings;
use std::io::Write;

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let exit_code = exit_code_for_run_result(run(&cli), &mut stdout, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn init_logging(cli: &Cli) {
    let mut builder = env_logger::Builder::from_default_env();
    if cli.quiet || cli.verbosity > 0 || std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(cli.log_level());
    }
    builder.format_timestamp(None).init();
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    match &cli.config {
        Some(path) => Ok(Settings::load(path)?),
        None => Ok(Settings::default()),
    }
}

fn run(cli: &Cli) -> Result<Utf8PathBuf> {
    let settings = load_settings(cli).map_err(|err| ShimError::Resolve(Box::new(err)))?;
    let deps = Dependencies::system(&settings);
    let request = cli.request(std::env::var(LIB_PATH_ENV).ok());
    resolve_library_path(&request, &settings, &deps)
}

fn exit_code_for_run_result(
    result: Result<Utf8PathBuf>,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    match result {
        Ok(path) => {
            write_line(stdout, path);
            0
        }
        Err(err) => {
            write_line(stderr, format!("error: {}", err.error_chain()));
            1
        }
    }
}

fn write_line(out: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(out, "{message}").is_err() {
        // Best-effort output; ignore write failures.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_prints_the_path_on_stdout() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let code = exit_code_for_run_result(
            Ok(Utf8PathBuf::from("/cache/v0.3.1/linux-amd64/libchroma_shim.so")),
            &mut stdout,
            &mut stderr,
        );

        assert_eq!(code, 0);
        assert_eq!(
            String::from_utf8(stdout).expect("stdout was not UTF-8"),
            "/cache/v0.3.1/linux-amd64/libchroma_shim.so\n"
        );
        assert!(stderr.is_empty());
    }

    #[test]
    fn failure_prints_the_chain_and_returns_one() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let code = exit_code_for_run_result(
            Err(ShimError::Resolve(Box::new(ShimError::NotConfigured))),
            &mut stdout,
            &mut stderr,
        );

        assert_eq!(code, 1);
        assert!(stdout.is_empty());
        assert_eq!(
            String::from_utf8(stderr).expect("stderr was not UTF-8"),
            "error: could not resolve library path: no library path configured and \
             automatic download is disabled\n"
        );
    }

    #[test]
    fn missing_settings_file_is_reported() {
        let cli = Cli {
            config: Some(Utf8PathBuf::from("/nonexistent/shimfetch.toml")),
            ..Cli::default()
        };

        let err = load_settings(&cli).expect_err("missing file");

        assert!(err.error_chain().contains("/nonexistent/shimfetch.toml"));
    }
}
