//! Daemon-start suppression during package configuration.
//!
//! During stage 2, `dpkg --configure` would otherwise try to start
//! services inside the target via `invoke-rc.d`/`start-stop-daemon`.
//! Suppressed by replacing `sbin/start-stop-daemon` with a symlink to
//! `/bin/true` (the original saved as `.REAL`) and writing
//! `usr/sbin/policy-rc.d` exiting 101. `heal` implements detect-and-heal
//! idempotence: it must run unconditionally at the
//! start of every `ChrootEnv::prepare` so a prior run that died mid-stage
//! self-repairs before proceeding.

use crate::error::DebstrapError;
use camino::Utf8Path;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};

const START_STOP_DAEMON: &str = "sbin/start-stop-daemon";
const START_STOP_DAEMON_REAL: &str = "sbin/start-stop-daemon.REAL";
const POLICY_RC_D: &str = "usr/sbin/policy-rc.d";

const POLICY_RC_D_SCRIPT: &str = "#!/bin/sh\nexit 101\n";

/// Replaces `start-stop-daemon` with a symlink to `/bin/true` and writes
/// `policy-rc.d`. No-op if suppression is already installed.
pub fn suppress(target: &Utf8Path) -> Result<(), DebstrapError> {
    heal(target)?;

    let real = target.join(START_STOP_DAEMON);
    let backup = target.join(START_STOP_DAEMON_REAL);
    if real.exists() {
        fs::rename(&real, &backup).map_err(|e| DebstrapError::io(real.to_string(), e))?;
        symlink("/bin/true", &real).map_err(|e| DebstrapError::io(real.to_string(), e))?;
    }

    let policy = target.join(POLICY_RC_D);
    fs::write(&policy, POLICY_RC_D_SCRIPT).map_err(|e| DebstrapError::io(policy.to_string(), e))?;
    fs::set_permissions(&policy, fs::Permissions::from_mode(0o755))
        .map_err(|e| DebstrapError::io(policy.to_string(), e))?;

    Ok(())
}

/// Restores the original `start-stop-daemon` and removes `policy-rc.d`.
/// Called on successful completion of configuration.
pub fn restore(target: &Utf8Path) -> Result<(), DebstrapError> {
    let real = target.join(START_STOP_DAEMON);
    let backup = target.join(START_STOP_DAEMON_REAL);
    if backup.exists() {
        fs::remove_file(&real).ok();
        fs::rename(&backup, &real).map_err(|e| DebstrapError::io(real.to_string(), e))?;
    }

    let policy = target.join(POLICY_RC_D);
    if policy.exists() {
        fs::remove_file(&policy).map_err(|e| DebstrapError::io(policy.to_string(), e))?;
    }

    Ok(())
}

/// Detects leftover suppression state from a prior run that died before
/// `restore` and heals it: `.REAL` present implies suppression was
/// installed but never restored, so restore it; `policy-rc.d` present
/// without a matching `.REAL` just needs removing.
pub fn heal(target: &Utf8Path) -> Result<(), DebstrapError> {
    let backup = target.join(START_STOP_DAEMON_REAL);
    if backup.exists() {
        restore(target)?;
    } else {
        let policy = target.join(POLICY_RC_D);
        if policy.exists() {
            fs::remove_file(&policy).map_err(|e| DebstrapError::io(policy.to_string(), e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn target_with_start_stop_daemon() -> (tempfile::TempDir, Utf8PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let target = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        fs::create_dir_all(target.join("sbin")).unwrap();
        fs::create_dir_all(target.join("usr/sbin")).unwrap();
        fs::write(target.join(START_STOP_DAEMON), b"#!/bin/sh\necho real\n").unwrap();
        (tmp, target)
    }

    #[test]
    fn suppress_then_restore_round_trips() {
        let (_tmp, target) = target_with_start_stop_daemon();

        suppress(&target).unwrap();
        assert!(fs::symlink_metadata(target.join(START_STOP_DAEMON))
            .unwrap()
            .file_type()
            .is_symlink());
        assert!(target.join(POLICY_RC_D).exists());

        restore(&target).unwrap();
        assert!(!fs::symlink_metadata(target.join(START_STOP_DAEMON))
            .unwrap()
            .file_type()
            .is_symlink());
        assert!(!target.join(POLICY_RC_D).exists());
    }

    #[test]
    fn heal_restores_orphaned_real_backup() {
        let (_tmp, target) = target_with_start_stop_daemon();
        suppress(&target).unwrap();

        // Simulate a crash: policy-rc.d and .REAL both still present.
        heal(&target).unwrap();

        assert!(!target.join(START_STOP_DAEMON_REAL).exists());
        assert!(!target.join(POLICY_RC_D).exists());
        assert!(!fs::symlink_metadata(target.join(START_STOP_DAEMON))
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[test]
    fn heal_removes_orphaned_policy_rc_d_without_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let target = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        fs::create_dir_all(target.join("usr/sbin")).unwrap();
        fs::write(target.join(POLICY_RC_D), POLICY_RC_D_SCRIPT).unwrap();

        heal(&target).unwrap();
        assert!(!target.join(POLICY_RC_D).exists());
    }
}
