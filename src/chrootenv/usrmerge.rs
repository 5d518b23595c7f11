//! The usrmerge invariant: `/bin`, `/sbin`, `/lib`, `/lib64` are symlinks
//! into `usr/`, mirrored under `usr/lib/debug/`.

use crate::error::DebstrapError;
use camino::Utf8Path;
use std::fs;
use std::os::unix::fs::symlink;

/// The four top-level directories the usrmerge convention symlinks.
pub const MERGED_DIRS: [&str; 4] = ["bin", "sbin", "lib", "lib64"];

/// Ensures each of [`MERGED_DIRS`] exists as `<target>/<d>` pointing at
/// `usr/<d>`, and mirrors the same merge under `usr/lib/debug/`.
///
/// Idempotent: re-running on an already-merged target does nothing. Fails
/// with [`DebstrapError::UsrMergeConflict`] if `<d>` exists as a real
/// directory instead of a symlink.
pub fn ensure(target: &Utf8Path) -> Result<(), DebstrapError> {
    for dir in MERGED_DIRS {
        ensure_one(target, dir)?;
    }

    let debug_root = target.join("usr/lib/debug");
    fs::create_dir_all(&debug_root).map_err(|e| DebstrapError::io(debug_root.to_string(), e))?;
    for dir in MERGED_DIRS {
        ensure_merged_symlink(
            &debug_root.join(dir),
            &format!("usr/{dir}"),
            dir,
        )?;
    }

    Ok(())
}

fn ensure_one(target: &Utf8Path, dir: &str) -> Result<(), DebstrapError> {
    let usr_dir = target.join("usr").join(dir);
    fs::create_dir_all(&usr_dir).map_err(|e| DebstrapError::io(usr_dir.to_string(), e))?;

    let link_path = target.join(dir);
    ensure_merged_symlink(&link_path, &format!("usr/{dir}"), dir)
}

fn ensure_merged_symlink(link_path: &Utf8Path, link_target: &str, dir_name: &str) -> Result<(), DebstrapError> {
    match fs::symlink_metadata(link_path) {
        Ok(meta) if meta.file_type().is_symlink() => Ok(()),
        Ok(_) => Err(DebstrapError::UsrMergeConflict {
            path: link_path.to_string(),
            target: dir_name.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            symlink(link_target, link_path).map_err(|e| DebstrapError::io(link_path.to_string(), e))
        }
        Err(e) => Err(DebstrapError::io(link_path.to_string(), e)),
    }
}
