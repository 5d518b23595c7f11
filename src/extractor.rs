//! Materializes one archive member into a target tree.
//!
//! Implemented directly with `rustix::fs`, the same low-level style
//! `phase/assemble/resolv_conf.rs` uses for `rustix::fs::{self as rfs, CWD, Mode, OFlags}`:
//! `mknodat` for devices and fifos, `symlinkat`/`linkat` for links,
//! `fchownat` with `AtFlags::SYMLINK_NOFOLLOW` for non-dereferencing chown,
//! and `utimensat` for mtime. Every path is joined and validated before any
//! filesystem call is made, so a malicious `..` component never reaches the
//! kernel.

use crate::archive::{ArchiveMember, ArchiveMemberType};
use crate::error::DebstrapError;
use camino::{Utf8Path, Utf8PathBuf};
use rustix::fs::{self as rfs, Mode};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path};

/// Materializes `member`'s payload under `root`, honoring its declared
/// type, mode, ownership, and timestamps.
pub fn extract(member: &ArchiveMember, root: &Utf8Path) -> Result<(), DebstrapError> {
    let dest = resolve_destination(root, &member.name)?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| DebstrapError::io(parent.to_string(), e))?;
    }

    match member.member_type {
        ArchiveMemberType::File => extract_file(member, &dest)?,
        ArchiveMemberType::Dir => extract_dir(member, &dest)?,
        ArchiveMemberType::Symlink => extract_symlink(member, &dest)?,
        ArchiveMemberType::Hardlink => extract_hardlink(member, root, &dest)?,
        ArchiveMemberType::CharDev => extract_device(member, &dest, rustix::fs::FileType::CharacterDevice)?,
        ArchiveMemberType::BlockDev => extract_device(member, &dest, rustix::fs::FileType::BlockDevice)?,
        ArchiveMemberType::Fifo => extract_fifo(member, &dest)?,
    }

    Ok(())
}

/// Joins `root` with `member_name`, rejecting any `..` component or an
/// absolute member name before the path is ever used.
fn resolve_destination(root: &Utf8Path, member_name: &str) -> Result<Utf8PathBuf, DebstrapError> {
    let member_path = Path::new(member_name);

    if member_path.is_absolute() {
        return Err(DebstrapError::PathEscape {
            archive: root.to_string(),
            name: member_name.to_string(),
        });
    }

    for component in member_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err(DebstrapError::PathEscape {
                archive: root.to_string(),
                name: member_name.to_string(),
            });
        }
    }

    Ok(root.join(member_name))
}

fn extract_file(member: &ArchiveMember, dest: &Utf8Path) -> Result<(), DebstrapError> {
    let file_name = dest.file_name().unwrap_or("debstrap-tmp");
    let tmp = dest
        .parent()
        .unwrap_or(Utf8Path::new("."))
        .join(format!(".{file_name}.debstrap-tmp-{}", std::process::id()));
    {
        let mut f = fs::File::create(&tmp).map_err(|e| DebstrapError::io(tmp.to_string(), e))?;
        f.write_all(&member.data)
            .map_err(|e| DebstrapError::io(tmp.to_string(), e))?;
    }
    fs::rename(&tmp, dest).map_err(|e| DebstrapError::io(dest.to_string(), e))?;

    chmod(dest, member.mode)?;
    chown_nofollow(dest, member.uid, member.gid)?;
    set_times(dest, member.mtime)?;
    Ok(())
}

fn extract_dir(member: &ArchiveMember, dest: &Utf8Path) -> Result<(), DebstrapError> {
    if !dest.exists() {
        fs::create_dir_all(dest).map_err(|e| DebstrapError::io(dest.to_string(), e))?;
    }
    chmod(dest, member.mode)?;
    chown_nofollow(dest, member.uid, member.gid)?;
    set_times(dest, member.mtime)?;
    Ok(())
}

fn extract_symlink(member: &ArchiveMember, dest: &Utf8Path) -> Result<(), DebstrapError> {
    let linkname = member.linkname.as_deref().ok_or_else(|| DebstrapError::UnsupportedMember {
        archive: dest.to_string(),
        name: member.name.clone(),
        reason: "symlink entry missing link target".to_string(),
    })?;

    if dest.is_symlink() || dest.exists() {
        fs::remove_file(dest).map_err(|e| DebstrapError::io(dest.to_string(), e))?;
    }
    rfs::symlinkat(linkname, rfs::CWD, dest.as_std_path())
        .map_err(|e| DebstrapError::MountFailed(format!("symlinkat {dest}: {e}")))?;

    chown_nofollow(dest, member.uid, member.gid)?;
    // Per the extraction rules: do not chmod or set times on the link itself.
    Ok(())
}

fn extract_hardlink(member: &ArchiveMember, root: &Utf8Path, dest: &Utf8Path) -> Result<(), DebstrapError> {
    let target_name = member.linkname.as_deref().ok_or_else(|| DebstrapError::UnsupportedMember {
        archive: dest.to_string(),
        name: member.name.clone(),
        reason: "hardlink entry missing link target".to_string(),
    })?;
    let target = resolve_destination(root, target_name)?;

    if dest.exists() {
        fs::remove_file(dest).map_err(|e| DebstrapError::io(dest.to_string(), e))?;
    }
    rfs::linkat(
        rfs::CWD,
        target.as_std_path(),
        rfs::CWD,
        dest.as_std_path(),
        rfs::AtFlags::empty(),
    )
    .map_err(|e| DebstrapError::MountFailed(format!("linkat {target} -> {dest}: {e}")))?;
    Ok(())
}

fn extract_device(
    member: &ArchiveMember,
    dest: &Utf8Path,
    file_type: rustix::fs::FileType,
) -> Result<(), DebstrapError> {
    if dest.exists() {
        fs::remove_file(dest).map_err(|e| DebstrapError::io(dest.to_string(), e))?;
    }
    let dev = rfs::makedev(member.major, member.minor);
    let mode = Mode::from_raw_mode(member.mode);
    rfs::mknodat(rfs::CWD, dest.as_std_path(), file_type, mode, dev)
        .map_err(|e| DebstrapError::PermissionDenied(format!("mknodat {dest}: {e}")))?;

    chown_nofollow(dest, member.uid, member.gid)?;
    set_times(dest, member.mtime)?;
    Ok(())
}

fn extract_fifo(member: &ArchiveMember, dest: &Utf8Path) -> Result<(), DebstrapError> {
    if dest.exists() {
        fs::remove_file(dest).map_err(|e| DebstrapError::io(dest.to_string(), e))?;
    }
    let mode = Mode::from_raw_mode(member.mode);
    rfs::mknodat(rfs::CWD, dest.as_std_path(), rustix::fs::FileType::Fifo, mode, 0)
        .map_err(|e| DebstrapError::PermissionDenied(format!("mknodat (fifo) {dest}: {e}")))?;

    chown_nofollow(dest, member.uid, member.gid)?;
    set_times(dest, member.mtime)?;
    Ok(())
}

fn chmod(path: &Utf8Path, mode: u32) -> Result<(), DebstrapError> {
    let perms = fs::Permissions::from_mode(mode);
    fs::set_permissions(path, perms).map_err(|e| DebstrapError::io(path.to_string(), e))
}

/// Sets ownership without dereferencing the final path component, so
/// symlinks are chowned rather than their referents.
fn chown_nofollow(path: &Utf8Path, uid: u32, gid: u32) -> Result<(), DebstrapError> {
    let uid = rustix::fs::Uid::from_raw(uid);
    let gid = rustix::fs::Gid::from_raw(gid);
    rfs::chownat(
        rfs::CWD,
        path.as_std_path(),
        Some(uid),
        Some(gid),
        rfs::AtFlags::SYMLINK_NOFOLLOW,
    )
    .map_err(|e| DebstrapError::PermissionDenied(format!("chown {path}: {e}")))
}

fn set_times(path: &Utf8Path, mtime: i64) -> Result<(), DebstrapError> {
    let timestamp = rustix::fs::Timespec {
        tv_sec: mtime,
        tv_nsec: 0,
    };
    let times = rustix::fs::Timestamps {
        last_access: timestamp,
        last_modification: timestamp,
    };
    rfs::utimensat(rfs::CWD, path.as_std_path(), &times, rfs::AtFlags::SYMLINK_NOFOLLOW)
        .map_err(|e| DebstrapError::io(path.to_string(), std::io::Error::from(e)))
}
