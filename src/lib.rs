pub mod archive;
pub mod bootstrapper;
pub mod chrootenv;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod package_db;
pub mod package_index;

pub use error::DebstrapError;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{filter::LevelFilter, FmtSubscriber};

use crate::config::Configuration;
use crate::executor::CommandExecutor;

/// Installs the global `tracing` subscriber at the given level.
pub fn init_logging(log_level: cli::LogLevel) -> Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => LevelFilter::TRACE,
        cli::LogLevel::Debug => LevelFilter::DEBUG,
        cli::LogLevel::Info => LevelFilter::INFO,
        cli::LogLevel::Warn => LevelFilter::WARN,
        cli::LogLevel::Error => LevelFilter::ERROR,
    };

    tracing::subscriber::set_global_default(FmtSubscriber::builder().with_max_level(filter).finish())
        .context("failed to set global default tracing subscriber")
}

/// Builds a [`Configuration`] from parsed CLI arguments, resolving `arch`
/// and `keyring` against the host when not given explicitly.
pub fn build_configuration(cli: &cli::Cli, executor: &dyn CommandExecutor) -> Result<Configuration> {
    let arch = match &cli.arch {
        Some(arch) => arch.clone(),
        None => Configuration::resolve_arch(executor)?,
    };
    let keyring = Configuration::resolve_keyring(cli.keyring.clone());
    if keyring.is_none() {
        tracing::warn!("no default keyring present; archive fetches will be unauthenticated");
    }

    Ok(Configuration {
        arch,
        keyring,
        required: cli.required(),
        important: cli.important(),
        recommends: cli.recommends(),
        dry_run: cli.dry_run,
        debug: cli.debug,
        components: cli.components.clone(),
        packages: cli.packages.clone(),
        suite: cli.suite.clone(),
        url: cli.mirror.clone(),
        target: cli.target.clone(),
    })
}

/// Runs a full bootstrap from parsed CLI arguments: builds the
/// configuration, constructs a [`bootstrapper::Bootstrapper`], and drives
/// it to completion.
pub fn run(cli: &cli::Cli) -> Result<()> {
    // Always a real executor: even a dry run needs a genuine `apt-get
    // update`/`apt-cache dumpavail` to resolve real package data (the
    // printed preview must reflect the actual archive). Mutating steps
    // (mounts, chroot, fetch, install) are skipped by `Bootstrapper::run`'s
    // own dry-run branch, not by suppressing the executor.
    let executor: Arc<dyn CommandExecutor> = Arc::new(executor::RealCommandExecutor { dry_run: false });

    if !cli.target.exists() {
        std::fs::create_dir_all(&cli.target)
            .with_context(|| format!("failed to create target directory: {}", cli.target))?;
    }

    let configuration = build_configuration(cli, executor.as_ref())?;
    let mut bootstrapper = bootstrapper::Bootstrapper::new(configuration, executor);
    bootstrapper.run()
}
