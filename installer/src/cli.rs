//! Command-line interface for the `shimfetch` binary.

use crate::resolve::LibraryRequest;
use camino::Utf8PathBuf;
use clap::Parser;
use log::LevelFilter;

/// Resolve, download and verify the local runtime shim library.
#[derive(Parser, Debug, Default, Clone, PartialEq, Eq)]
#[command(name = "shimfetch")]
#[command(version, about)]
#[command(long_about = concat!(
    "Resolve the path of the local runtime shim library.\n\n",
    "A path given with --library-path or CHROMA_LIB_PATH is printed as is. ",
    "Otherwise the library is looked up in the cache and, on a miss, downloaded ",
    "from the configured mirrors. The checksum manifest must carry a valid ",
    "signature from the release workflow before any archive is trusted.",
))]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Print the cached library, downloading it if needed:\n",
    "    $ shimfetch\n\n",
    "  Fetch a specific release into a custom cache:\n",
    "    $ shimfetch --version-tag v0.3.1 --cache-dir /var/cache/shim\n\n",
    "  Only accept an explicit path:\n",
    "    $ CHROMA_LIB_PATH=/opt/shim/libchroma_shim.so shimfetch --no-download\n",
))]
pub struct Cli {
    /// Use this library instead of the cache.
    #[arg(long, value_name = "PATH")]
    pub library_path: Option<String>,

    /// Release tag to resolve (e.g. v0.3.1).
    #[arg(long, value_name = "TAG")]
    pub version_tag: Option<String>,

    /// Cache root [default: ~/.cache/chroma/local_shim].
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<Utf8PathBuf>,

    /// TOML settings file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Fail instead of downloading a missing library.
    #[arg(long)]
    pub no_download: bool,

    /// Only report errors.
    #[arg(short, long, conflicts_with = "verbosity")]
    pub quiet: bool,

    /// Increase log output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

impl Cli {
    /// Log level implied by `-q` and `-v`.
    #[must_use]
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Error;
        }
        match self.verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    /// Build a resolution request, with `env_override` taken from the
    /// environment by the caller.
    #[must_use]
    pub fn request(&self, env_override: Option<String>) -> LibraryRequest {
        LibraryRequest {
            explicit_path: self.library_path.clone(),
            env_override,
            version: self.version_tag.clone(),
            cache_root: self.cache_dir.clone(),
            auto_download: !self.no_download,
            platform: None,
        }
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
