//! The two-stage bootstrap state machine.
//!
//! Driven by [`Bootstrapper::run`], in the same single-struct-owns-its-
//! collaborators shape as `Pipeline`'s orchestration functions:
//! `Bootstrapper` owns a [`ChrootEnv`], a `Box<dyn PackageIndex>`, and the
//! target path `PackageDb` operates against, and its `Drop` impl (not just
//! its happy-path tail) drains the mount stack and removes the temporary
//! keyring, matching `MountStack`'s own `Drop` discipline one level up.

use crate::archive;
use crate::chrootenv::ChrootEnv;
use crate::config::Configuration;
use crate::error::DebstrapError;
use crate::executor::CommandExecutor;
use crate::extractor;
use crate::package_db::PackageDb;
use crate::package_index::{AptCacheIndex, Package, PackageIndex, PriorityClass};
use std::io::Write;
use std::sync::Arc;

/// States of the bootstrap state machine, in transition order. Not every
/// state is observable from outside `run()`; the enum exists so tests and
/// logging can name "where we are" precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Init,
    Updated,
    MarkedEssential,
    Fetched,
    Extracted,
    FakeInstalled,
    ChrootPrepared,
    EarlyInstalled,
    Unpacked,
    Configured,
    MarkedFinal,
    Committed,
    Done,
}

/// Fixed install order for stage 2's early package set, with the force
/// flags the native installer needs before a full dependency graph exists.
const EARLY_PACKAGES: &[&str] = &[
    "base-passwd",
    "base-files",
    "dpkg",
    "libc6",
    "perl-base",
    "mawk",
    "debconf",
    "debianutils",
    "passwd",
];

const FORCE_FLAGS: &[&str] = &["--force-depends", "--force-unsafe-io"];

/// Drives a target from an empty directory to a configured, bootstrapped
/// chroot.
pub struct Bootstrapper {
    config: Configuration,
    chroot: ChrootEnv,
    index: AptCacheIndex,
    state: BootstrapState,
}

impl Bootstrapper {
    pub fn new(config: Configuration, executor: Arc<dyn CommandExecutor>) -> Self {
        let index = AptCacheIndex::new(
            config.target.clone(),
            config.components.clone(),
            config.recommends,
            executor.clone(),
        );
        let chroot = ChrootEnv::new(config.target.clone(), executor, config.dry_run);
        Self {
            config,
            chroot,
            index,
            state: BootstrapState::Init,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Runs the full state machine to completion (or to `DONE` via the
    /// `DRY_RUN` branch).
    pub fn run(&mut self) -> anyhow::Result<()> {
        self.transition_updated()?;

        if self.config.dry_run {
            self.transition_dry_run()?;
            self.state = BootstrapState::Done;
            return Ok(());
        }

        self.transition_marked_essential()?;
        self.transition_fetched()?;
        self.transition_extracted()?;
        self.transition_fake_installed()?;
        self.transition_chroot_prepared()?;
        self.transition_early_installed()?;
        self.transition_unpacked()?;
        self.transition_configured()?;
        self.transition_marked_final()?;
        self.transition_committed()?;
        self.transition_done()?;

        Ok(())
    }

    fn transition_updated(&mut self) -> anyhow::Result<()> {
        tracing::info!("refreshing package index");
        self.index.update()?;
        self.state = BootstrapState::Updated;
        Ok(())
    }

    /// UPDATED -> branch: dry-run prints the union of marked priority
    /// classes as `<name>\t<version>` lines sorted by name, deduplicated,
    /// using the constructor-stored `dry_run` field rather than any value
    /// captured from an outer scope.
    fn transition_dry_run(&mut self) -> anyhow::Result<()> {
        let mut packages = self.mark_all_for_dry_run()?;
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        packages.dedup_by(|a, b| a.identity() == b.identity());

        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        for package in &packages {
            writeln!(handle, "{}\t{}", package.identity(), package.version)?;
        }
        Ok(())
    }

    fn mark_all_for_dry_run(&mut self) -> Result<Vec<Package>, DebstrapError> {
        let mut packages = self.index.filter_by_priority(PriorityClass::Essential);
        if self.config.required {
            packages.extend(self.index.filter_by_priority(PriorityClass::Required));
        }
        if self.config.important {
            packages.extend(self.index.filter_by_priority(PriorityClass::Important));
        }
        for name in &self.config.packages {
            self.index.mark_install(name)?;
        }
        packages.extend(self.index.changes());
        Ok(packages)
    }

    /// UPDATED -> MARKED(essential): mark every package whose `essential`
    /// attribute is true, plus `apt-utils` (a workaround for a debconf
    /// dependency). Marking happens exactly once here, never a second time
    /// through a redundant `mark_all_packages`-style call from the dry-run
    /// path.
    fn transition_marked_essential(&mut self) -> anyhow::Result<()> {
        for package in self.index.filter_by_priority(PriorityClass::Essential) {
            self.index.mark_install(&package.name)?;
        }
        self.index.mark_install("apt-utils")?;
        self.state = BootstrapState::MarkedEssential;
        Ok(())
    }

    fn transition_fetched(&mut self) -> anyhow::Result<()> {
        tracing::info!("fetching marked archives");
        self.index.fetch_archives()?;
        self.state = BootstrapState::Fetched;
        Ok(())
    }

    /// FETCHED -> EXTRACTED: for each marked package's archive, use
    /// `archive`+`extractor` to populate the target directly. No chroot;
    /// no running installer.
    fn transition_extracted(&mut self) -> anyhow::Result<()> {
        for package in self.index.changes() {
            let archive_path = self.index.archive_path(&package);
            tracing::debug!(package = %package.name, path = %archive_path, "extracting");
            let handle = archive::open(&archive_path)?;
            handle.each_member(|member| extractor::extract(member, self.config.target.as_path()))?;
        }
        self.state = BootstrapState::Extracted;
        Ok(())
    }

    fn transition_fake_installed(&mut self) -> anyhow::Result<()> {
        let db = PackageDb::new(self.config.target.as_path());
        db.fake_install("dpkg", "0")?;
        self.state = BootstrapState::FakeInstalled;
        Ok(())
    }

    fn transition_chroot_prepared(&mut self) -> anyhow::Result<()> {
        self.chroot.prepare_skeleton(
            &self.config.url,
            &self.config.suite,
            &self.config.components,
            self.config.keyring.as_deref(),
        )?;
        self.chroot.prepare_chroot()?;
        self.state = BootstrapState::ChrootPrepared;
        Ok(())
    }

    /// -> EARLY_INSTALLED: run the native installer inside the chroot on
    /// the fixed [`EARLY_PACKAGES`] list, one invocation each.
    fn transition_early_installed(&mut self) -> anyhow::Result<()> {
        for package in EARLY_PACKAGES {
            let mut args = vec!["--install", package];
            args.extend_from_slice(FORCE_FLAGS);
            let result = self.chroot.run_in_chroot("dpkg", &args)?;
            if !result.success() {
                return Err(DebstrapError::InstallerFailed {
                    command: format!("dpkg --install {package}"),
                    status: format!("{:?}", result.code()),
                }
                .into());
            }
        }
        self.state = BootstrapState::EarlyInstalled;
        Ok(())
    }

    /// -> UNPACKED: unpack-only for every remaining marked package.
    fn transition_unpacked(&mut self) -> anyhow::Result<()> {
        let changes = self.index.changes();
        let remaining: Vec<&Package> = changes
            .iter()
            .filter(|p| !EARLY_PACKAGES.contains(&p.name.as_str()))
            .collect();

        for package in remaining {
            let archive_path = self.index.archive_path(package).to_string();
            let mut args = vec!["--unpack", archive_path.as_str()];
            args.extend_from_slice(FORCE_FLAGS);
            let result = self.chroot.run_in_chroot("dpkg", &args)?;
            if !result.success() {
                return Err(DebstrapError::InstallerFailed {
                    command: format!("dpkg --unpack {}", package.name),
                    status: format!("{:?}", result.code()),
                }
                .into());
            }
        }
        self.state = BootstrapState::Unpacked;
        Ok(())
    }

    fn transition_configured(&mut self) -> anyhow::Result<()> {
        let args = ["--configure", "--pending", "--force-configure-any", "--force-depends", "--force-unsafe-io"];
        let result = self.chroot.run_in_chroot("dpkg", &args)?;
        if !result.success() {
            return Err(DebstrapError::InstallerFailed {
                command: "dpkg --configure --pending".to_string(),
                status: format!("{:?}", result.code()),
            }
            .into());
        }
        self.state = BootstrapState::Configured;
        Ok(())
    }

    /// -> MARKED(+required,+important,+requested): `PackageDb::refresh`
    /// then re-mark; any user-requested name absent from the index fails
    /// with `UnknownPackage`.
    fn transition_marked_final(&mut self) -> anyhow::Result<()> {
        let db = PackageDb::new(self.config.target.as_path());
        db.refresh(&self.index);
        self.index.open()?;

        if self.config.required {
            for package in self.index.filter_by_priority(PriorityClass::Required) {
                self.index.mark_install(&package.name)?;
            }
        }
        if self.config.important {
            for package in self.index.filter_by_priority(PriorityClass::Important) {
                self.index.mark_install(&package.name)?;
            }
        }
        for name in self.config.packages.clone() {
            self.index.mark_install(&name)?;
        }

        self.state = BootstrapState::MarkedFinal;
        Ok(())
    }

    fn transition_committed(&mut self) -> anyhow::Result<()> {
        self.index.commit()?;
        self.state = BootstrapState::Committed;
        Ok(())
    }

    /// -> DONE: restore daemon controls, unmount `/sys`, `/proc`, `/tmp`
    /// in order, remove the temporary keyring. On success the keyring is
    /// actually removed here, via the correctly-named field rather than a
    /// misspelled one.
    fn transition_done(&mut self) -> anyhow::Result<()> {
        self.chroot.teardown()?;
        self.state = BootstrapState::Done;
        tracing::info!("Installation complete");
        Ok(())
    }
}

impl Drop for Bootstrapper {
    fn drop(&mut self) {
        if self.state == BootstrapState::Done {
            return;
        }
        if let Err(e) = self.chroot.teardown() {
            tracing::error!(error = %e, "cleanup during drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommandSpec, ExecutionResult};
    use camino::Utf8PathBuf;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    struct StubExecutor;
    impl CommandExecutor for StubExecutor {
        fn execute(&self, _spec: &CommandSpec) -> anyhow::Result<ExecutionResult> {
            Ok(ExecutionResult {
                status: Some(ExitStatus::from_raw(0)),
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }

    const SAMPLE_DUMPAVAIL: &[u8] = b"\
Package: base-files
Priority: required
Architecture: amd64
Version: 12.4
Multi-Arch: no
Essential: yes

Package: systemd
Priority: important
Architecture: amd64
Version: 252.22-1
Multi-Arch: no

";

    /// Succeeds for everything, and answers `apt-cache dumpavail` with a
    /// small real-shaped catalog so `mark_install` has something to find.
    struct PopulatedCatalogExecutor;
    impl CommandExecutor for PopulatedCatalogExecutor {
        fn execute(&self, spec: &CommandSpec) -> anyhow::Result<ExecutionResult> {
            let stdout = if spec.command == "apt-cache" {
                SAMPLE_DUMPAVAIL.to_vec()
            } else {
                Vec::new()
            };
            Ok(ExecutionResult {
                status: Some(ExitStatus::from_raw(0)),
                stdout,
                stderr: Vec::new(),
            })
        }
    }

    fn test_config(target: Utf8PathBuf, dry_run: bool) -> Configuration {
        Configuration {
            arch: "amd64".to_string(),
            keyring: None,
            required: true,
            important: true,
            recommends: true,
            dry_run,
            debug: false,
            components: vec!["main".to_string()],
            packages: vec![],
            suite: "bookworm".to_string(),
            url: "http://deb.debian.org/debian".to_string(),
            target,
        }
    }

    #[test]
    fn dry_run_uses_constructor_stored_flag_not_outer_scope() {
        let tmp = tempfile::tempdir().unwrap();
        let target = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let mut bootstrapper = Bootstrapper::new(test_config(target, true), Arc::new(StubExecutor));

        bootstrapper.run().unwrap();
        assert_eq!(bootstrapper.state(), BootstrapState::Done);
    }

    /// Dry run with a requested package name must resolve it against a
    /// real, populated catalog rather than an always-empty one: with
    /// `StubExecutor`'s blanket empty output `mark_install("systemd")` would
    /// incorrectly fail with `UnknownPackage`.
    #[test]
    fn dry_run_resolves_requested_package_against_populated_catalog() {
        let tmp = tempfile::tempdir().unwrap();
        let target = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let mut config = test_config(target, true);
        config.packages = vec!["systemd".to_string()];
        let mut bootstrapper = Bootstrapper::new(config, Arc::new(PopulatedCatalogExecutor));

        bootstrapper.run().unwrap();
        assert_eq!(bootstrapper.state(), BootstrapState::Done);
    }

    #[test]
    fn drop_tears_down_when_not_done() {
        let tmp = tempfile::tempdir().unwrap();
        let target = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let mut bootstrapper = Bootstrapper::new(test_config(target, true), Arc::new(StubExecutor));
        bootstrapper.state = BootstrapState::ChrootPrepared;
        drop(bootstrapper);
        // No panic, and teardown() is idempotent even though nothing was mounted.
    }
}
