//! Binary package (`.deb`) archive reading.
//!
//! A `.deb` is an `ar` container holding `debian-binary`, `control.tar.*`,
//! and `data.tar.*` members in that order. This module only cares about
//! `data.tar.*`: it locates the member by name prefix, picks a decompressor
//! from its filename suffix, and walks the resulting tar stream, handing
//! each entry to the caller as an [`ArchiveMember`] with its payload bytes.
//!
//! Grounded the way `indygreg-PyOxidizer`'s `debian-packaging` crate builds
//! `.deb` files with the `ar` crate (there used for writing, here for
//! reading) and decodes `data.tar.*` through `tar::Archive` over one of
//! `flate2`/`xz2`/`zstd`.

use crate::error::DebstrapError;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// The kind of filesystem object an [`ArchiveMember`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMemberType {
    File,
    Dir,
    Symlink,
    Hardlink,
    CharDev,
    BlockDev,
    Fifo,
}

/// One entry from a package's `data.tar.*`, with metadata and payload.
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    /// Path relative to the target root, no leading `/`.
    pub name: String,
    /// Declared payload size in bytes (0 for non-file types).
    pub size: u64,
    /// 12-bit permission bits.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: i64,
    pub member_type: ArchiveMemberType,
    /// Link target for symlink/hardlink entries.
    pub linkname: Option<String>,
    /// Device major number, for char-dev/block-dev entries.
    pub major: u32,
    /// Device minor number, for char-dev/block-dev entries.
    pub minor: u32,
    /// Payload bytes. Empty for dir/symlink/hardlink/device/fifo entries.
    pub data: Vec<u8>,
}

/// An opened `.deb` archive, positioned to decode its `data.tar.*` member.
pub struct ArchiveHandle {
    path: PathBuf,
    entries: Vec<ArchiveMember>,
}

/// Decodes the `data.tar.*` member of a binary package at `path`.
///
/// Returns a [`DebstrapError::MalformedArchive`] when the `ar` container has
/// no `data.tar.*` member, when its compression suffix is unrecognized, or
/// when a tar entry's actual byte count disagrees with its declared size.
pub fn open(path: impl AsRef<Path>) -> Result<ArchiveHandle, DebstrapError> {
    let path = path.as_ref().to_path_buf();
    let file = File::open(&path).map_err(|e| DebstrapError::io(path.display().to_string(), e))?;

    let mut ar_reader = ar::Archive::new(file);
    let mut data_tar: Option<(String, Vec<u8>)> = None;

    while let Some(entry) = ar_reader.next_entry() {
        let mut entry = entry.map_err(|e| DebstrapError::MalformedArchive {
            path: path.display().to_string(),
            reason: format!("invalid ar container: {e}"),
        })?;
        let name = String::from_utf8_lossy(entry.header().identifier()).to_string();
        if name.starts_with("data.tar") {
            let mut buf = Vec::new();
            entry
                .read_to_end(&mut buf)
                .map_err(|e| DebstrapError::io(format!("{}: {}", path.display(), name), e))?;
            data_tar = Some((name, buf));
            break;
        }
    }

    let (name, compressed) = data_tar.ok_or_else(|| DebstrapError::MalformedArchive {
        path: path.display().to_string(),
        reason: "no data.tar.* member present".to_string(),
    })?;

    let decompressed = decompress(&name, &compressed, &path)?;
    let entries = read_tar(&decompressed, &path)?;

    Ok(ArchiveHandle { path, entries })
}

fn decompress(member_name: &str, data: &[u8], archive_path: &Path) -> Result<Vec<u8>, DebstrapError> {
    let mut out = Vec::new();
    if member_name.ends_with(".gz") {
        flate2::read::GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| DebstrapError::MalformedArchive {
                path: archive_path.display().to_string(),
                reason: format!("gzip decode failed: {e}"),
            })?;
    } else if member_name.ends_with(".xz") {
        xz2::read::XzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| DebstrapError::MalformedArchive {
                path: archive_path.display().to_string(),
                reason: format!("xz decode failed: {e}"),
            })?;
    } else if member_name.ends_with(".zst") {
        out = zstd::stream::decode_all(data).map_err(|e| DebstrapError::MalformedArchive {
            path: archive_path.display().to_string(),
            reason: format!("zstd decode failed: {e}"),
        })?;
    } else {
        // "data.tar" with no suffix: uncompressed.
        out = data.to_vec();
    }
    Ok(out)
}

fn read_tar(data: &[u8], archive_path: &Path) -> Result<Vec<ArchiveMember>, DebstrapError> {
    let mut archive = tar::Archive::new(data);
    let mut members = Vec::new();

    for entry in archive
        .entries()
        .map_err(|e| DebstrapError::MalformedArchive {
            path: archive_path.display().to_string(),
            reason: format!("failed to read tar entries: {e}"),
        })?
    {
        let mut entry = entry.map_err(|e| DebstrapError::MalformedArchive {
            path: archive_path.display().to_string(),
            reason: format!("failed to read tar entry: {e}"),
        })?;

        let header = entry.header().clone();
        let name = entry
            .path()
            .map_err(|e| DebstrapError::MalformedArchive {
                path: archive_path.display().to_string(),
                reason: format!("invalid entry path: {e}"),
            })?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();

        let declared_size = header.size().unwrap_or(0);
        let member_type = match header.entry_type() {
            tar::EntryType::Regular | tar::EntryType::Continuous => ArchiveMemberType::File,
            tar::EntryType::Directory => ArchiveMemberType::Dir,
            tar::EntryType::Symlink => ArchiveMemberType::Symlink,
            tar::EntryType::Link => ArchiveMemberType::Hardlink,
            tar::EntryType::Char => ArchiveMemberType::CharDev,
            tar::EntryType::Block => ArchiveMemberType::BlockDev,
            tar::EntryType::Fifo => ArchiveMemberType::Fifo,
            other => {
                return Err(DebstrapError::UnsupportedMember {
                    archive: archive_path.display().to_string(),
                    name,
                    reason: format!("unsupported tar entry type {other:?}"),
                });
            }
        };

        let linkname = header
            .link_name()
            .ok()
            .flatten()
            .map(|p| p.to_string_lossy().to_string());

        let mut data = Vec::new();
        if member_type == ArchiveMemberType::File {
            entry
                .read_to_end(&mut data)
                .map_err(|e| DebstrapError::io(format!("{}: {}", archive_path.display(), name), e))?;
            if data.len() as u64 != declared_size {
                return Err(DebstrapError::MalformedArchive {
                    path: archive_path.display().to_string(),
                    reason: format!(
                        "member {name} declared size {declared_size} but read {} bytes",
                        data.len()
                    ),
                });
            }
        }

        members.push(ArchiveMember {
            name,
            size: declared_size,
            mode: header.mode().unwrap_or(0o644) & 0o7777,
            uid: header.uid().unwrap_or(0) as u32,
            gid: header.gid().unwrap_or(0) as u32,
            mtime: header.mtime().unwrap_or(0) as i64,
            member_type,
            linkname,
            major: header.device_major().ok().flatten().unwrap_or(0),
            minor: header.device_minor().ok().flatten().unwrap_or(0),
            data,
        });
    }

    Ok(members)
}

impl ArchiveHandle {
    /// Path of the `.deb` file this handle was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Visits each member in the archive's own on-disk order.
    ///
    /// Preserving that order matters: in a well-formed tar, directories
    /// appear before their children, and the extractor relies on that
    /// ordering rather than sorting or re-deriving it.
    pub fn each_member<F>(&self, mut visitor: F) -> Result<(), DebstrapError>
    where
        F: FnMut(&ArchiveMember) -> Result<(), DebstrapError>,
    {
        for member in &self.entries {
            visitor(member)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_test_deb(data_tar_name: &str, tar_bytes: Vec<u8>) -> Vec<u8> {
        let mut ar_builder = ar::Builder::new(Vec::new());

        let debian_binary = b"2.0\n";
        ar_builder
            .append(
                &ar::Header::new(b"debian-binary".to_vec(), debian_binary.len() as u64),
                &debian_binary[..],
            )
            .unwrap();

        ar_builder
            .append(
                &ar::Header::new(data_tar_name.as_bytes().to_vec(), tar_bytes.len() as u64),
                tar_bytes.as_slice(),
            )
            .unwrap();

        ar_builder.into_inner().unwrap()
    }

    fn build_tar_with_one_file(name: &str, contents: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_path(name).unwrap();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_600_000_000);
        header.set_cksum();
        builder.append(&header, contents).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn reads_uncompressed_data_tar() {
        let tar_bytes = build_tar_with_one_file("usr/bin/hello", b"hi there");
        let deb_bytes = build_test_deb("data.tar", tar_bytes);

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&deb_bytes).unwrap();

        let handle = open(tmp.path()).unwrap();
        let mut seen = Vec::new();
        handle
            .each_member(|m| {
                seen.push(m.name.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec!["usr/bin/hello"]);
    }

    #[test]
    fn reads_gzip_data_tar() {
        let tar_bytes = build_tar_with_one_file("etc/hostname", b"example\n");
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        let gz_bytes = encoder.finish().unwrap();
        let deb_bytes = build_test_deb("data.tar.gz", gz_bytes);

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&deb_bytes).unwrap();

        let handle = open(tmp.path()).unwrap();
        let mut sizes = Vec::new();
        handle
            .each_member(|m| {
                sizes.push(m.size);
                Ok(())
            })
            .unwrap();
        assert_eq!(sizes, vec![8]);
    }

    #[test]
    fn missing_data_tar_is_malformed() {
        let mut ar_builder = ar::Builder::new(Vec::new());
        let debian_binary = b"2.0\n";
        ar_builder
            .append(
                &ar::Header::new(b"debian-binary".to_vec(), debian_binary.len() as u64),
                &debian_binary[..],
            )
            .unwrap();
        let deb_bytes = ar_builder.into_inner().unwrap();

        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&deb_bytes).unwrap();

        let err = open(tmp.path()).unwrap_err();
        assert!(matches!(err, DebstrapError::MalformedArchive { .. }));
    }
}
