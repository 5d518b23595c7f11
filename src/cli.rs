//! Command-line interface definition for debstrap.
//!
//! This tool only ever does one thing — bootstrap a target directory — so
//! unlike an `Apply`/`Validate`/`Completions` subcommand split,
//! there is a single flat argument set built directly with `clap::Parser`.

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum, ValueHint};

use crate::config::DEFAULT_MIRROR;

/// Command-line arguments for a single bootstrap run.
#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    /// Suite name (e.g. `bookworm`, `jammy`).
    pub suite: String,

    /// Target directory to bootstrap.
    #[arg(value_hint = ValueHint::DirPath)]
    pub target: Utf8PathBuf,

    /// Archive mirror URL. Defaults to the built-in Debian mirror.
    #[arg(default_value = DEFAULT_MIRROR)]
    pub mirror: String,

    /// Resolve and print the package set without mutating the target.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Target architecture. Defaults to the host's first configured
    /// architecture.
    #[arg(short, long)]
    pub arch: Option<String>,

    /// Comma-separated archive components (e.g. `main,contrib`).
    #[arg(long, value_delimiter = ',', default_value = "main")]
    pub components: Vec<String>,

    /// Comma-separated extra package names to install.
    #[arg(long, value_delimiter = ',')]
    pub packages: Vec<String>,

    /// Path to a GPG keyring to install into the target.
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub keyring: Option<Utf8PathBuf>,

    /// Mark and install `Priority: required` packages.
    #[arg(long, default_value_t = true, overrides_with = "no_required")]
    pub required: bool,
    /// Disable installation of `Priority: required` packages.
    #[arg(long = "no-required", overrides_with = "required")]
    pub no_required: bool,

    /// Mark and install `Priority: important` packages.
    #[arg(long, default_value_t = true, overrides_with = "no_important")]
    pub important: bool,
    /// Disable installation of `Priority: important` packages.
    #[arg(long = "no-important", overrides_with = "important")]
    pub no_important: bool,

    /// Honor `Install-Recommends` during dependency expansion.
    #[arg(long, default_value_t = true, overrides_with = "no_recommends")]
    pub recommends: bool,
    /// Disable `Install-Recommends` during dependency expansion.
    #[arg(long = "no-recommends", overrides_with = "recommends")]
    pub no_recommends: bool,

    /// Increase log verbosity by one level.
    #[arg(short, long)]
    pub verbose: bool,

    /// Force debug-level logging and include child-process detail in
    /// error output.
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Resolves the `required`/`no-required`-style flag pairs clap parsed
    /// into the single booleans [`crate::config::Configuration`] wants.
    ///
    /// `overrides_with` guarantees exactly one of each pair wins, so the
    /// positive field already reflects the final value except when the
    /// negative flag was the last one given and the positive field still
    /// holds its default; checking the negative field covers that case.
    pub fn required(&self) -> bool {
        self.required && !self.no_required
    }

    /// See [`Cli::required`].
    pub fn important(&self) -> bool {
        self.important && !self.no_important
    }

    /// See [`Cli::required`].
    pub fn recommends(&self) -> bool {
        self.recommends && !self.no_recommends
    }

    /// The effective [`LogLevel`], applying `--debug` and `-v/--verbose`.
    pub fn log_level(&self) -> LogLevel {
        if self.debug {
            LogLevel::Debug
        } else if self.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }
}

/// Log verbosity levels, mapping directly onto `tracing`'s levels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Converts to the `tracing` level filter of the same name.
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Parses command-line arguments into a [`Cli`].
pub fn parse_args() -> Cli {
    Cli::parse()
}
