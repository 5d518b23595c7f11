//! LIFO mount stack for a target being bootstrapped.
//!
//! Grounded directly on `isolation::mount::RootfsMounts`: push
//! mounts in order, pop them in reverse, guarantee cleanup via `Drop` even
//! on an error path. Unlike that declarative list of `MountEntry`s known
//! up front, this stack grows one push at a
//! time as `Bootstrapper` reaches each mount point (`proc`, `sys`, a bind
//! mount of `/tmp`), since the CHROOT_PREPARED transition mounts
//! them individually rather than as a batch.

use crate::error::DebstrapError;
use crate::executor::{CommandExecutor, CommandSpec};
use camino::Utf8PathBuf;
use std::sync::Arc;

/// One currently-mounted target, recorded so it can be unmounted later.
struct MountedEntry {
    target: Utf8PathBuf,
}

/// LIFO stack of mounts performed inside a target root.
///
/// Invariant upheld by construction: at normal exit and on any failure
/// path, `drain()` (called explicitly, or via `Drop`) leaves the stack
/// empty.
pub struct MountStack {
    executor: Arc<dyn CommandExecutor>,
    dry_run: bool,
    entries: Vec<MountedEntry>,
}

impl MountStack {
    pub fn new(executor: Arc<dyn CommandExecutor>, dry_run: bool) -> Self {
        Self {
            executor,
            dry_run,
            entries: Vec::new(),
        }
    }

    /// True if nothing is currently mounted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mounts `fstype` from `source` at `target` with `options`, pushing it
    /// onto the stack on success.
    ///
    /// If `target` is already a mount point, this is a warning no-op rather
    /// than a second push, so re-running a half-finished bootstrap doesn't
    /// double-mount.
    pub fn mount(
        &mut self,
        fstype: &str,
        source: &str,
        target: &Utf8PathBuf,
        options: &[&str],
    ) -> Result<(), DebstrapError> {
        if self.is_already_mounted(target) {
            tracing::warn!(target = %target, "already mounted, skipping");
            return Ok(());
        }

        std::fs::create_dir_all(target).map_err(|e| DebstrapError::io(target.to_string(), e))?;

        let mut args: Vec<std::ffi::OsString> = vec!["-t".into(), fstype.into()];
        if !options.is_empty() {
            args.push("-o".into());
            args.push(options.join(",").into());
        }
        args.push(source.into());
        args.push(target.as_str().into());

        let spec = CommandSpec::new("mount", args);
        tracing::info!(%target, %source, %fstype, "mounting");

        let result = self
            .executor
            .execute(&spec)
            .map_err(|e| DebstrapError::MountFailed(format!("mount {target}: {e}")))?;

        if !result.success() {
            return Err(DebstrapError::MountFailed(format!(
                "mount {target} exited {:?}",
                result.code()
            )));
        }

        self.entries.push(MountedEntry { target: target.clone() });
        Ok(())
    }

    /// Unmounts the most recently mounted entry if it matches `target`;
    /// no-op if `target` isn't the top of the stack.
    pub fn unmount(&mut self, target: &Utf8PathBuf) -> Result<(), DebstrapError> {
        let Some(top) = self.entries.last() else {
            return Ok(());
        };
        if &top.target != target {
            return Ok(());
        }
        self.unmount_top()
    }

    fn unmount_top(&mut self) -> Result<(), DebstrapError> {
        let Some(entry) = self.entries.pop() else {
            return Ok(());
        };

        tracing::info!(target = %entry.target, "unmounting");
        let spec = CommandSpec::new("umount", vec![entry.target.as_str().into()]);
        let result = self
            .executor
            .execute(&spec)
            .map_err(|e| DebstrapError::MountFailed(format!("umount {}: {e}", entry.target)))?;

        if !result.success() {
            return Err(DebstrapError::MountFailed(format!(
                "umount {} exited {:?}",
                entry.target,
                result.code()
            )));
        }
        Ok(())
    }

    /// Drains the stack in reverse (LIFO) order. Errors from individual
    /// unmounts are collected and reported together; draining continues
    /// regardless so a single stuck mount doesn't block the rest.
    pub fn drain(&mut self) -> Result<(), DebstrapError> {
        let mut errors = Vec::new();
        while !self.entries.is_empty() {
            if let Err(e) = self.unmount_top() {
                errors.push(e.to_string());
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DebstrapError::MountFailed(errors.join("; ")))
        }
    }

    fn is_already_mounted(&self, target: &Utf8PathBuf) -> bool {
        if self.dry_run {
            return false;
        }
        std::fs::read_to_string("/proc/mounts")
            .map(|mounts| mounts.lines().any(|line| line.split_whitespace().nth(1) == Some(target.as_str())))
            .unwrap_or(false)
    }
}

impl Drop for MountStack {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        if let Err(e) = self.drain() {
            tracing::error!(error = %e, "failed to unmount remaining filesystems during cleanup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionResult;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    struct MockExecutor {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl MockExecutor {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }
        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandExecutor for MockExecutor {
        fn execute(&self, spec: &CommandSpec) -> anyhow::Result<ExecutionResult> {
            let mut calls = self.calls.lock().unwrap();
            let mut args = vec![spec.command.clone()];
            args.extend(spec.args.iter().map(|a| a.to_string_lossy().to_string()));
            calls.push(args);
            Ok(ExecutionResult {
                status: Some(ExitStatus::from_raw(0)),
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }

    #[test]
    fn mount_and_drain_in_reverse_order() {
        let executor = Arc::new(MockExecutor::new());
        let mut stack = MountStack::new(executor.clone(), true);

        stack
            .mount("proc", "proc", &Utf8PathBuf::from("/tmp/t/proc"), &[])
            .unwrap();
        stack
            .mount("sysfs", "sysfs", &Utf8PathBuf::from("/tmp/t/sys"), &[])
            .unwrap();

        assert!(!stack.is_empty());
        stack.drain().unwrap();
        assert!(stack.is_empty());

        let calls = executor.calls();
        assert_eq!(calls[0][0], "mount");
        assert_eq!(calls[1][0], "mount");
        assert_eq!(calls[2][0], "umount");
        assert!(calls[2][1].contains("sys"));
        assert_eq!(calls[3][0], "umount");
        assert!(calls[3][1].contains("proc"));
    }

    #[test]
    fn drop_drains_remaining_mounts() {
        let executor = Arc::new(MockExecutor::new());
        {
            let mut stack = MountStack::new(executor.clone(), true);
            stack
                .mount("proc", "proc", &Utf8PathBuf::from("/tmp/t/proc"), &[])
                .unwrap();
        }
        let calls = executor.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1][0], "umount");
    }
}
