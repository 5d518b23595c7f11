//! Bootstrap configuration.
//!
//! Unlike a YAML-profile-driven `Profile`, this crate's
//! [`Configuration`] is built directly from CLI flags (see `cli.rs`): there
//! is no manifest file, no provisioner list, no backend selection. The
//! struct mirrors the option set enumerated in the data model: every field
//! has a stated default, and two of them (`arch`, `keyring`) resolve host
//! state lazily rather than at parse time.

use crate::error::DebstrapError;
use crate::executor::{CommandExecutor, CommandSpec};
use camino::Utf8PathBuf;

/// The well-known keyring path used when `--keyring` is not given.
///
/// Matches the path Debian/Ubuntu installs their archive keyring to; if it
/// is absent, unauthenticated fetches are permitted and the caller must log
/// that fact (see `Configuration::resolve_keyring`).
pub const DEFAULT_KEYRING_PATH: &str = "/usr/share/keyrings/debian-archive-keyring.gpg";

/// The built-in default mirror used when the CLI's optional `MIRROR`
/// positional is omitted.
pub const DEFAULT_MIRROR: &str = "http://deb.debian.org/debian";

/// Bootstrap configuration: the full set of recognized options, all with
/// defaults.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Target architecture. Defaults to the host's first configured
    /// architecture (`dpkg --print-architecture`) when not given explicitly.
    pub arch: String,
    /// Path to a GPG keyring to install into the target, if any.
    pub keyring: Option<Utf8PathBuf>,
    /// Whether to mark and install `Priority: required` packages.
    pub required: bool,
    /// Whether to mark and install `Priority: important` packages.
    pub important: bool,
    /// Whether dependency expansion honors `Install-Recommends`.
    pub recommends: bool,
    /// Resolve and print the package set without mutating the target.
    pub dry_run: bool,
    /// Force debug-level logging and include child-process detail in error
    /// output.
    pub debug: bool,
    /// Archive components (e.g. `main`, `universe`).
    pub components: Vec<String>,
    /// Extra package names requested by the caller.
    pub packages: Vec<String>,
    /// Suite name (e.g. `bookworm`, `jammy`).
    pub suite: String,
    /// Archive mirror URL.
    pub url: String,
    /// Target directory being bootstrapped.
    pub target: Utf8PathBuf,
}

impl Configuration {
    /// Resolves `arch` against the host when not explicitly set, by
    /// shelling out to `dpkg --print-architecture` through `executor`.
    ///
    /// Returns [`DebstrapError::Config`] if `dpkg` cannot be run or its
    /// output is not a single recognizable architecture token, since this
    /// tool bootstraps Debian-family systems and is expected to run from
    /// one.
    pub fn resolve_arch(executor: &dyn CommandExecutor) -> Result<String, DebstrapError> {
        let spec = CommandSpec::new("dpkg", vec!["--print-architecture".into()]);
        let result = executor
            .execute(&spec)
            .map_err(|e| DebstrapError::Config(format!("dpkg --print-architecture: {e}")))?;

        if !result.success() {
            return Err(DebstrapError::Config(
                "dpkg --print-architecture exited non-zero; pass --arch explicitly".to_string(),
            ));
        }

        let arch = String::from_utf8_lossy(&result.stdout).trim().to_string();
        if arch.is_empty() {
            return Err(DebstrapError::Config(
                "dpkg --print-architecture produced no output; pass --arch explicitly"
                    .to_string(),
            ));
        }
        Ok(arch)
    }

    /// Resolves the effective keyring path: the explicit `--keyring` value
    /// if given, else [`DEFAULT_KEYRING_PATH`] if that file exists, else
    /// `None` (unauthenticated fetches permitted; caller must log this).
    pub fn resolve_keyring(explicit: Option<Utf8PathBuf>) -> Option<Utf8PathBuf> {
        if explicit.is_some() {
            return explicit;
        }
        let default = Utf8PathBuf::from(DEFAULT_KEYRING_PATH);
        if default.exists() {
            Some(default)
        } else {
            None
        }
    }
}
