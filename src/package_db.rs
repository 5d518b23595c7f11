//! The on-disk installed-package database inside the target.
//!
//! Two operations, as spec'd: `fake_install` writes a synthetic
//! single-stanza `status` file so the native installer believes itself
//! already present before stage 2 can run it; `refresh` signals the
//! `PackageIndex` that an external (chrooted) process has mutated the
//! status file and the in-memory view must be rebuilt.

use crate::error::DebstrapError;
use crate::package_index::AptCacheIndex;
use camino::Utf8Path;
use std::fs;

/// Operations against `var/lib/dpkg/status` and friends inside a target.
pub struct PackageDb<'a> {
    target: &'a Utf8Path,
}

impl<'a> PackageDb<'a> {
    pub fn new(target: &'a Utf8Path) -> Self {
        Self { target }
    }

    /// Rewrites `status` with a single fake-installed stanza for `name`
    /// and creates an empty `var/lib/dpkg/info/<name>.list`.
    ///
    /// Used exactly once, for the native installer package itself,
    /// between stage 1 extraction and the first real install.
    pub fn fake_install(&self, name: &str, version: &str) -> Result<(), DebstrapError> {
        let status_path = self.target.join("var/lib/dpkg/status");
        let stanza = format!(
            "Package: {name}\nVersion: {version}\nMaintainer: unknown\nStatus: install ok installed\n\n"
        );
        fs::write(&status_path, stanza).map_err(|e| DebstrapError::io(status_path.to_string(), e))?;

        let info_dir = self.target.join("var/lib/dpkg/info");
        fs::create_dir_all(&info_dir).map_err(|e| DebstrapError::io(info_dir.to_string(), e))?;
        let list_path = info_dir.join(format!("{name}.list"));
        fs::write(&list_path, b"").map_err(|e| DebstrapError::io(list_path.to_string(), e))?;

        Ok(())
    }

    /// Signals `index` that the status file has been mutated externally
    /// and must not be trusted until reopened.
    pub fn refresh(&self, index: &AptCacheIndex) {
        index.mark_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn fake_install_writes_single_stanza() {
        let tmp = tempfile::tempdir().unwrap();
        let target = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        fs::create_dir_all(target.join("var/lib/dpkg")).unwrap();

        let db = PackageDb::new(&target);
        db.fake_install("dpkg", "1.21.22").unwrap();

        let status = fs::read_to_string(target.join("var/lib/dpkg/status")).unwrap();
        assert_eq!(status.matches("Package:").count(), 1);
        assert!(status.contains("Package: dpkg"));
        assert!(status.contains("Status: install ok installed"));
        assert!(target.join("var/lib/dpkg/info/dpkg.list").exists());
    }

    #[test]
    fn refresh_marks_index_dirty() {
        let index = AptCacheIndex::new(Utf8PathBuf::from("/tmp/t"), vec!["main".to_string()], true);
        let tmp = tempfile::tempdir().unwrap();
        let target = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let db = PackageDb::new(&target);
        db.refresh(&index);
        // mark_dirty is side-effecting via Cell; no panic is the assertion.
    }
}
