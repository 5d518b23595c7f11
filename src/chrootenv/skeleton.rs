//! Target directory skeleton: the directories, files, and keyring copy a
//! fresh target needs before any package extraction happens.

use crate::error::DebstrapError;
use crate::package_index::sources_list_line;
use camino::Utf8Path;
use std::fs;

/// Directories that must exist after skeleton creation, per the target
/// invariants.
const SKELETON_DIRS: &[&str] = &[
    "etc/apt/apt.conf.d",
    "etc/apt/preferences.d",
    "etc/apt/trusted.gpg.d",
    "var/lib/apt/lists/partial",
    "var/cache/apt/archives/partial",
    "var/log/apt",
    "var/lib/dpkg/updates",
    "var/lib/dpkg/info",
];

/// The path, relative to the target, that a configured keyring is copied
/// to and later removed from on success.
pub const KEYRING_DEST: &str = "etc/apt/trusted.gpg.d/apt-bootstrap.gpg";

/// Creates the skeleton directories, `sources.list`, the empty status/
/// available files, and copies the keyring blob if one is configured.
///
/// Idempotent: re-running on an already-prepared target neither mutates
/// files nor raises, matching the skeleton idempotence property.
pub fn create(
    target: &Utf8Path,
    url: &str,
    suite: &str,
    components: &[String],
    keyring: Option<&Utf8Path>,
) -> Result<(), DebstrapError> {
    for dir in SKELETON_DIRS {
        let path = target.join(dir);
        fs::create_dir_all(&path).map_err(|e| DebstrapError::io(path.to_string(), e))?;
    }

    let sources_list = target.join("etc/apt/sources.list");
    fs::write(&sources_list, sources_list_line(url, suite, components))
        .map_err(|e| DebstrapError::io(sources_list.to_string(), e))?;

    let status = target.join("var/lib/dpkg/status");
    if !status.exists() {
        fs::write(&status, b"").map_err(|e| DebstrapError::io(status.to_string(), e))?;
    }

    let available = target.join("var/lib/dpkg/available");
    if !available.exists() {
        fs::write(&available, b"").map_err(|e| DebstrapError::io(available.to_string(), e))?;
    }

    if let Some(keyring_path) = keyring {
        let dest = target.join(KEYRING_DEST);
        fs::copy(keyring_path, &dest).map_err(|e| DebstrapError::io(dest.to_string(), e))?;
    } else {
        tracing::warn!("no keyring configured; archive fetches will be unauthenticated");
    }

    Ok(())
}

/// Removes the temporary keyring installed by [`create`], if present.
///
/// Called on successful completion of a bootstrap; a missing file is not
/// an error, since no keyring may have been configured at all.
pub fn remove_keyring(target: &Utf8Path) -> Result<(), DebstrapError> {
    let dest = target.join(KEYRING_DEST);
    match fs::remove_file(&dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DebstrapError::io(dest.to_string(), e)),
    }
}
