//! `ChrootEnv`: target directory layout management — skeleton, usrmerge,
//! device nodes, mount stack, and daemon-start suppression — plus
//! `run_in_chroot` for invoking the native installer inside it.

pub mod daemon_suppress;
pub mod makedev;
pub mod mount;
pub mod skeleton;
pub mod usrmerge;

use crate::error::DebstrapError;
use crate::executor::{CommandExecutor, CommandSpec, ExecutionResult};
use camino::{Utf8Path, Utf8PathBuf};
use mount::MountStack;
use std::sync::Arc;

/// Owns a target directory's layout state: its mount stack, and the path
/// being bootstrapped. Constructed once per `Bootstrapper`.
pub struct ChrootEnv {
    target: Utf8PathBuf,
    executor: Arc<dyn CommandExecutor>,
    dry_run: bool,
    mounts: MountStack,
}

impl ChrootEnv {
    pub fn new(target: Utf8PathBuf, executor: Arc<dyn CommandExecutor>, dry_run: bool) -> Self {
        let mounts = MountStack::new(executor.clone(), dry_run);
        Self { target, executor, dry_run, mounts }
    }

    pub fn target(&self) -> &Utf8Path {
        &self.target
    }

    /// Runs the skeleton + usrmerge steps that must precede any package
    /// extraction. Idempotent.
    pub fn prepare_skeleton(
        &self,
        url: &str,
        suite: &str,
        components: &[String],
        keyring: Option<&Utf8Path>,
    ) -> Result<(), DebstrapError> {
        skeleton::create(&self.target, url, suite, components, keyring)?;
        usrmerge::ensure(&self.target)?;
        daemon_suppress::heal(&self.target)
    }

    /// The CHROOT_PREPARED transition: device nodes, `proc`/`sys`/`/tmp`
    /// mounts, `ldconfig`, and the `awk`/`localtime` fallback symlinks.
    pub fn prepare_chroot(&mut self) -> Result<(), DebstrapError> {
        makedev::make_dev(&self.target)?;

        let proc_target = self.target.join("proc");
        self.mounts.mount("proc", "proc", &proc_target, &[])?;

        let sys_target = self.target.join("sys");
        self.mounts.mount("sysfs", "sysfs", &sys_target, &[])?;

        let tmp_target = self.target.join("tmp");
        self.mounts.mount("none", "/tmp", &tmp_target, &["bind"])?;

        let result = self
            .run_in_chroot("ldconfig", &[])
            .map_err(|e| DebstrapError::MountFailed(format!("ldconfig: {e}")))?;
        if !result.success() {
            return Err(DebstrapError::InstallerFailed {
                command: "ldconfig".to_string(),
                status: format!("{:?}", result.code()),
            });
        }

        self.ensure_symlink("usr/bin/awk", "mawk")?;
        self.ensure_symlink("etc/localtime", "/usr/share/zoneinfo/UTC")?;

        daemon_suppress::suppress(&self.target)?;

        Ok(())
    }

    fn ensure_symlink(&self, relative_path: &str, link_target: &str) -> Result<(), DebstrapError> {
        let path = self.target.join(relative_path);
        if path.exists() || std::fs::symlink_metadata(&path).is_ok() {
            return Ok(());
        }
        std::os::unix::fs::symlink(link_target, &path).map_err(|e| DebstrapError::io(path.to_string(), e))
    }

    /// Runs `command` with `args` inside the target under `chroot`,
    /// grounded on `ChrootExecutor`: validates the rootfs
    /// exists, then executes `chroot <target> <command> <args...>`
    /// through the shared `CommandExecutor`, honoring dry-run.
    pub fn run_in_chroot(&self, command: &str, args: &[&str]) -> Result<ExecutionResult, DebstrapError> {
        if !self.dry_run && !self.target.is_dir() {
            return Err(DebstrapError::Config(format!(
                "chroot target does not exist: {}",
                self.target
            )));
        }

        let mut full_args: Vec<std::ffi::OsString> = vec![self.target.as_str().into(), command.into()];
        full_args.extend(args.iter().map(std::ffi::OsString::from));

        let spec = CommandSpec::new("chroot", full_args)
            .with_env("LC_ALL", "C")
            .with_env("DEBIAN_FRONTEND", "noninteractive");

        self.executor
            .execute(&spec)
            .map_err(|e| DebstrapError::InstallerFailed {
                command: command.to_string(),
                status: e.to_string(),
            })
    }

    /// The DONE transition's teardown: restore daemon controls, unmount
    /// `/sys`, `/proc`, `/tmp` in that order, remove the temporary
    /// keyring. Safe to call more than once.
    pub fn teardown(&mut self) -> Result<(), DebstrapError> {
        daemon_suppress::restore(&self.target)?;
        self.mounts.drain()?;
        skeleton::remove_keyring(&self.target)
    }

    /// Whether any mounts remain outstanding. Used by tests asserting the
    /// "mount stack is empty on success" invariant.
    pub fn mounts_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionResult as Exec;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    struct StubExecutor;
    impl CommandExecutor for StubExecutor {
        fn execute(&self, _spec: &CommandSpec) -> anyhow::Result<Exec> {
            Ok(Exec {
                status: Some(ExitStatus::from_raw(0)),
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }

    /// Succeeds for everything except `ldconfig`, which exits 1.
    struct LdconfigFailsExecutor;
    impl CommandExecutor for LdconfigFailsExecutor {
        fn execute(&self, spec: &CommandSpec) -> anyhow::Result<Exec> {
            let fails = spec.args.iter().any(|a| a == "ldconfig");
            Ok(Exec {
                status: Some(ExitStatus::from_raw(if fails { 256 } else { 0 })),
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }

    #[test]
    fn run_in_chroot_sets_required_env() {
        let tmp = tempfile::tempdir().unwrap();
        let target = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let env = ChrootEnv::new(target, Arc::new(StubExecutor), false);

        let result = env.run_in_chroot("true", &[]).unwrap();
        assert!(result.success());
    }

    #[test]
    fn run_in_chroot_fails_on_missing_target() {
        let env = ChrootEnv::new(
            Utf8PathBuf::from("/nonexistent/definitely/not/here"),
            Arc::new(StubExecutor),
            false,
        );
        let err = env.run_in_chroot("true", &[]).unwrap_err();
        assert!(matches!(err, DebstrapError::Config(_)));
    }

    #[test]
    fn teardown_leaves_mounts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let target = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let mut env = ChrootEnv::new(target, Arc::new(StubExecutor), true);
        env.teardown().unwrap();
        assert!(env.mounts_empty());
    }

    #[test]
    fn prepare_chroot_fails_when_ldconfig_exits_nonzero() {
        if !rustix::process::geteuid().is_root() {
            eprintln!("skipping: requires root to create device nodes");
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let target = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let mut env = ChrootEnv::new(target, Arc::new(LdconfigFailsExecutor), false);

        let err = env.prepare_chroot().unwrap_err();
        assert!(matches!(err, DebstrapError::InstallerFailed { .. }));
    }
}
