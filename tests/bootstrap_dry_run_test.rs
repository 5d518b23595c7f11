//! End-to-end coverage for `Bootstrapper::run()` that exercises the real
//! package-index plumbing instead of a no-op stub, using the shared
//! [`helpers::RecordingExecutor`].

mod helpers;

use std::sync::Arc;

use camino::Utf8PathBuf;
use debstrap::bootstrapper::{BootstrapState, Bootstrapper};
use debstrap::config::Configuration;
use helpers::{RecordingExecutor, SAMPLE_DUMPAVAIL};

fn dry_run_config(target: Utf8PathBuf, packages: Vec<String>) -> Configuration {
    Configuration {
        arch: "amd64".to_string(),
        keyring: None,
        required: false,
        important: false,
        recommends: true,
        dry_run: true,
        debug: false,
        components: vec!["main".to_string()],
        packages,
        suite: "bookworm".to_string(),
        url: "http://deb.debian.org/debian".to_string(),
        target,
    }
}

#[test]
fn dry_run_resolves_requested_package_against_a_populated_catalog() {
    let tmp = tempfile::tempdir().unwrap();
    let target = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
    let executor = Arc::new(RecordingExecutor::new().respond("apt-cache", 0, SAMPLE_DUMPAVAIL));

    let config = dry_run_config(target, vec!["systemd".to_string()]);
    let mut bootstrapper = Bootstrapper::new(config, executor.clone());

    bootstrapper.run().expect("dry run against a populated catalog should resolve systemd, not UnknownPackage");
    assert_eq!(bootstrapper.state(), BootstrapState::Done);

    // Catalog population went through the real apt-get/apt-cache path, not a
    // stub that fabricates package data.
    assert!(executor.call_count("apt-get") >= 1);
    assert!(executor.call_count("apt-cache") >= 1);
    // Dry run never touches the chroot or mount machinery.
    assert_eq!(executor.call_count("chroot"), 0);
    assert_eq!(executor.call_count("mount"), 0);
}

#[test]
fn dry_run_with_unknown_requested_package_fails_instead_of_silently_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let target = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
    let executor = Arc::new(RecordingExecutor::new().respond("apt-cache", 0, SAMPLE_DUMPAVAIL));

    let config = dry_run_config(target, vec!["frobnicate-does-not-exist".to_string()]);
    let mut bootstrapper = Bootstrapper::new(config, executor);

    let err = bootstrapper.run().unwrap_err();
    assert!(err.to_string().contains("frobnicate-does-not-exist"));
}
