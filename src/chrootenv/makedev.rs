//! Device node creation under `dev/` in the target.

use crate::error::DebstrapError;
use camino::Utf8Path;
use rustix::fs::{self as rfs, FileType, Mode};
use std::fs;
use std::os::unix::fs::symlink;

struct CharDevice {
    name: &'static str,
    major: u32,
    minor: u32,
    mode: u32,
    uid: u32,
    gid: u32,
}

const CHAR_DEVICES: &[CharDevice] = &[
    CharDevice { name: "full", major: 1, minor: 7, mode: 0o666, uid: 0, gid: 0 },
    CharDevice { name: "null", major: 1, minor: 3, mode: 0o666, uid: 0, gid: 0 },
    CharDevice { name: "random", major: 1, minor: 8, mode: 0o666, uid: 0, gid: 0 },
    CharDevice { name: "tty", major: 5, minor: 0, mode: 0o666, uid: 0, gid: 5 },
    CharDevice { name: "urandom", major: 1, minor: 9, mode: 0o666, uid: 0, gid: 0 },
    CharDevice { name: "zero", major: 1, minor: 5, mode: 0o666, uid: 0, gid: 0 },
];

const DEV_SYMLINKS: &[(&str, &str)] = &[
    ("fd", "/proc/self/fd"),
    ("stderr", "fd/2"),
    ("stdin", "fd/0"),
    ("stdout", "fd/1"),
];

/// Creates `dev/{full,null,random,tty,urandom,zero}`, the `dev/{fd,stderr,
/// stdin,stdout}` symlinks, `dev/shm`, `dev/pts`, and `dev/ptmx` (falling
/// back to a symlink with a logged warning when `mknod` is denied).
pub fn make_dev(target: &Utf8Path) -> Result<(), DebstrapError> {
    let dev = target.join("dev");
    fs::create_dir_all(&dev).map_err(|e| DebstrapError::io(dev.to_string(), e))?;

    for device in CHAR_DEVICES {
        make_char_device(&dev.join(device.name), device)?;
    }

    for (name, target_path) in DEV_SYMLINKS {
        let link = dev.join(name);
        if fs::symlink_metadata(&link).is_err() {
            symlink(target_path, &link).map_err(|e| DebstrapError::io(link.to_string(), e))?;
        }
    }

    let shm = dev.join("shm");
    fs::create_dir_all(&shm).map_err(|e| DebstrapError::io(shm.to_string(), e))?;
    let pts = dev.join("pts");
    fs::create_dir_all(&pts).map_err(|e| DebstrapError::io(pts.to_string(), e))?;

    make_ptmx(&dev)?;

    Ok(())
}

fn make_char_device(path: &Utf8Path, device: &CharDevice) -> Result<(), DebstrapError> {
    if fs::symlink_metadata(path).is_ok() {
        return Ok(());
    }
    let dev_id = rfs::makedev(device.major, device.minor);
    let mode = Mode::from_raw_mode(device.mode);
    rfs::mknodat(rfs::CWD, path.as_std_path(), FileType::CharacterDevice, mode, dev_id)
        .map_err(|e| DebstrapError::PermissionDenied(format!("mknod {path}: {e}")))?;

    let uid = rfs::Uid::from_raw(device.uid);
    let gid = rfs::Gid::from_raw(device.gid);
    rfs::chownat(rfs::CWD, path.as_std_path(), Some(uid), Some(gid), rfs::AtFlags::SYMLINK_NOFOLLOW)
        .map_err(|e| DebstrapError::PermissionDenied(format!("chown {path}: {e}")))?;

    Ok(())
}

/// Attempts `dev/ptmx` as a character device (5,2); on `mknod` failure,
/// falls back to a symlink `dev/ptmx -> pts/ptmx` and warns that the
/// caller must mount `devpts` with `ptmxmode=666`.
fn make_ptmx(dev: &Utf8Path) -> Result<(), DebstrapError> {
    let ptmx = dev.join("ptmx");
    if fs::symlink_metadata(&ptmx).is_ok() {
        return Ok(());
    }

    let dev_id = rfs::makedev(5, 2);
    let mode = Mode::from_raw_mode(0o666);
    match rfs::mknodat(rfs::CWD, ptmx.as_std_path(), FileType::CharacterDevice, mode, dev_id) {
        Ok(()) => Ok(()),
        Err(_) => {
            symlink("pts/ptmx", &ptmx).map_err(|e| DebstrapError::io(ptmx.to_string(), e))?;
            tracing::warn!(
                "mknod for dev/ptmx (5,2) denied; created symlink to pts/ptmx instead. \
                 mount devpts with ptmxmode=666 before relying on it."
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    fn is_root() -> bool {
        rustix::process::geteuid().is_root()
    }

    #[test]
    fn creates_symlinks_and_directories_regardless_of_privilege() {
        let tmp = tempfile::tempdir().unwrap();
        let target = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();

        if make_dev(&target).is_err() && !is_root() {
            // mknod for char devices may be denied without privilege; the
            // directories/symlinks created before that point still exist.
        }

        let dev = target.join("dev");
        assert!(dev.join("shm").is_dir());
        assert!(dev.join("pts").is_dir());
    }

    #[test]
    fn char_device_has_expected_major_minor_when_root() {
        if !is_root() {
            eprintln!("skipping: requires root to mknod");
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let target = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        make_dev(&target).unwrap();

        let null_path = target.join("dev/null");
        let meta = fs::symlink_metadata(&null_path).unwrap();
        assert!(!meta.file_type().is_symlink());
    }
}
