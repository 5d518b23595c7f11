//! Domain-specific error types for debstrap.
//!
//! This module defines `DebstrapError`, a `thiserror`-based enum that
//! provides typed error variants for the failure modes of the bootstrap
//! state machine. Component-level functions return `Result<T, DebstrapError>`
//! for programmatic error handling, while the orchestration layer
//! (`Bootstrapper`, `ChrootEnv`) continues to use `anyhow::Result`.
//!
//! `DebstrapError` implements `Into<anyhow::Error>`, so the `?` operator
//! converts it automatically at boundaries that return `anyhow::Result`.

use std::io;

/// Formats an IO error kind into a human-readable message.
///
/// Provides consistent, user-friendly messages for common IO error kinds
/// instead of the OS-level messages. For unrecognized error kinds, falls
/// back to including the OS-level error message directly.
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::AlreadyExists => "I/O error: already exists".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

/// Domain-specific error type for debstrap.
///
/// Variants correspond to the error kinds enumerated for the bootstrap core:
/// configuration, permission, archive decoding, extraction, chroot/mount
/// setup, and package resolution/installation failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DebstrapError {
    /// A configuration option was missing, malformed, or mutually exclusive
    /// with another.
    #[error("configuration error: {0}")]
    Config(String),

    /// The process lacks the privilege required for an operation
    /// (`chroot`, `mount`, `mknod`, `chown`).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A `.deb` archive could not be decoded: missing `data.tar.*` member,
    /// unsupported compression, or a size mismatch between the declared and
    /// actual member length.
    #[error("malformed archive {path}: {reason}")]
    MalformedArchive {
        /// Path to the `.deb` file being read.
        path: String,
        /// Human-readable reason for the failure.
        reason: String,
    },

    /// An archive member has a type the extractor does not know how to
    /// materialize.
    #[error("unsupported archive member {name} in {archive}: {reason}")]
    UnsupportedMember {
        /// Path to the `.deb` file being read.
        archive: String,
        /// Member path inside the archive.
        name: String,
        /// Why the member could not be handled.
        reason: String,
    },

    /// An archive member's name would resolve outside the target root.
    #[error("archive member {name} in {archive} escapes target root")]
    PathEscape {
        /// Path to the `.deb` file being read.
        archive: String,
        /// Offending member path.
        name: String,
    },

    /// `/bin`, `/sbin`, `/lib`, or `/lib64` already exists as a real
    /// directory instead of a usrmerge symlink.
    #[error("usrmerge conflict: {path} exists and is not a symlink to usr/{target}")]
    UsrMergeConflict {
        /// Path that conflicted (relative to target root).
        path: String,
        /// The `usr/<dir>` it should have pointed at.
        target: String,
    },

    /// A `mount` or `umount` invocation failed.
    #[error("mount operation failed: {0}")]
    MountFailed(String),

    /// A user-requested package name is not present in the archive index.
    #[error("unknown package: {0}")]
    UnknownPackage(String),

    /// Dependency resolution could not produce a consistent install set.
    #[error("dependency resolution failed: {0}")]
    DependencyUnresolved(String),

    /// Downloading one or more archives into the cache directory failed.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// The native installer (`dpkg`) exited non-zero inside the chroot.
    #[error("installer failed: {command}: {status}")]
    InstallerFailed {
        /// The command that was executed.
        command: String,
        /// Human-readable exit status or spawn failure description.
        status: String,
    },

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done when the error occurred (a path, or an
        /// operation description containing one).
        context: String,
        /// Human-readable description derived from [`io_error_kind_message`].
        message: String,
        /// The underlying I/O error, preserved for programmatic inspection.
        #[source]
        source: io::Error,
    },

    /// A catch-all for conditions that do not fit another variant.
    #[error("{0}")]
    UnknownError(String),
}

impl DebstrapError {
    /// Creates an `Io` variant with `message` derived automatically from
    /// `source`.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_display() {
        let err = DebstrapError::Config("components must not be empty".to_string());
        assert_eq!(err.to_string(), "configuration error: components must not be empty");
    }

    #[test]
    fn usrmerge_conflict_display() {
        let err = DebstrapError::UsrMergeConflict {
            path: "bin".to_string(),
            target: "bin".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "usrmerge conflict: bin exists and is not a symlink to usr/bin"
        );
    }

    #[test]
    fn installer_failed_display() {
        let err = DebstrapError::InstallerFailed {
            command: "dpkg --configure".to_string(),
            status: "exit status: 1".to_string(),
        };
        assert_eq!(err.to_string(), "installer failed: dpkg --configure: exit status: 1");
    }

    #[test]
    fn io_display_and_source() {
        let source = io::Error::new(io::ErrorKind::NotFound, "entity not found");
        let err = DebstrapError::io("/target/etc/apt/sources.list", source);
        assert_eq!(
            err.to_string(),
            "/target/etc/apt/sources.list: I/O error: not found"
        );
        match &err {
            DebstrapError::Io { source, .. } => assert_eq!(source.kind(), io::ErrorKind::NotFound),
            _ => unreachable!(),
        }
    }

    #[test]
    fn into_anyhow_error() {
        let err = DebstrapError::UnknownPackage("frobnicate".to_string());
        let anyhow_err: anyhow::Error = err.into();
        let downcast = anyhow_err.downcast_ref::<DebstrapError>();
        assert!(matches!(downcast, Some(DebstrapError::UnknownPackage(_))));
    }
}
