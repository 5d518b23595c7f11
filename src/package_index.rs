//! `PackageIndex`: the archive-metadata/resolution interface the core
//! consumes.
//!
//! This is an external collaborator — the core only needs "list,
//! resolve, fetch" — so no archive-metadata parser is implemented from
//! scratch. [`AptCacheIndex`] fulfills the trait by shelling out to
//! `apt-get`/`apt-cache`/`dpkg` against an APT configuration rooted at the
//! target's own `etc/apt`/`var/lib/apt`/`var/cache/apt`, the same technique
//! `debootstrap` itself uses before a chroot is runnable. This mirrors how
//! bootstrap backends (`backends::mmdebstrap`,
//! `backends::debootstrap`) drive an external tool through the shared
//! `CommandExecutor` rather than reimplementing it.

use crate::error::DebstrapError;
use crate::executor::{CommandExecutor, CommandSpec};
use camino::{Utf8Path, Utf8PathBuf};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Archive-declared importance level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PriorityClass {
    Essential,
    Required,
    Important,
    Standard,
    Optional,
    Extra,
    /// Not a real archive priority: packages named explicitly on the
    /// command line, which this crate treats as a priority class for the
    /// purpose of "mark a monotonically growing set".
    Requested,
}

/// Whether a package's files may coexist for multiple architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiArch {
    No,
    Same,
    Foreign,
    Allowed,
}

/// A single package record as resolved by the index.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub architecture: String,
    pub priority: PriorityClass,
    pub multi_arch: MultiArch,
    pub essential: bool,
    pub archive_path: Utf8PathBuf,
}

impl Package {
    /// Identity for chroot purposes: `name` unless `multi_arch == Same`, in
    /// which case `name:architecture`.
    pub fn identity(&self) -> String {
        if self.multi_arch == MultiArch::Same {
            format!("{}:{}", self.name, self.architecture)
        } else {
            self.name.clone()
        }
    }
}

/// The interface the bootstrap core requires of any package index.
pub trait PackageIndex {
    /// Refreshes metadata from configured sources.
    fn update(&mut self) -> Result<(), DebstrapError>;

    /// (Re)builds in-memory resolution state. Must be callable again after
    /// an external process has mutated the status file.
    fn open(&mut self) -> Result<(), DebstrapError>;

    /// Enumerates packages at or above the given priority class.
    fn filter_by_priority(&self, class: PriorityClass) -> Vec<Package>;

    /// Schedules a package for installation, propagating dependencies
    /// subject to the recommends setting.
    fn mark_install(&mut self, name: &str) -> Result<(), DebstrapError>;

    /// Packages whose state will change on commit.
    fn changes(&self) -> Vec<Package>;

    /// Downloads marked packages' archives to the cache directory.
    fn fetch_archives(&mut self) -> Result<(), DebstrapError>;

    /// Executes the transaction (fetch + unpack + configure) for marked
    /// packages via the in-chroot installer.
    fn commit(&mut self) -> Result<(), DebstrapError>;

    /// Path on disk where a package's `.deb` resides, named
    /// `<name>_<urlquoted version>_<arch>.deb`.
    fn archive_path(&self, package: &Package) -> Utf8PathBuf;
}

/// `PackageIndex` implementation that drives `apt-get`/`apt-cache`/`dpkg`
/// as subprocesses against the target's own APT directories.
pub struct AptCacheIndex {
    target: Utf8PathBuf,
    components: Vec<String>,
    recommends: bool,
    executor: Arc<dyn CommandExecutor>,
    marked: BTreeMap<String, Package>,
    catalog: Vec<Package>,
    /// Set by `PackageDB::refresh` (see `package_db.rs`) to signal that
    /// `open()` must not trust any previously cached resolution state.
    dirty: Cell<bool>,
}

impl AptCacheIndex {
    pub fn new(
        target: Utf8PathBuf,
        components: Vec<String>,
        recommends: bool,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            target,
            components,
            recommends,
            executor,
            marked: BTreeMap::new(),
            catalog: Vec::new(),
            dirty: Cell::new(true),
        }
    }

    /// Marks the index dirty; the next `open()` call must re-resolve
    /// rather than trust cached state. Called by `PackageDB::refresh`.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }

    /// Creates the directories `apt-get`/`apt-cache`/`dpkg` require to
    /// exist before they'll touch a rootdir at all (`lists/partial`,
    /// `archives/partial`, `var/lib/dpkg`), matching the layout
    /// `debootstrap` itself pre-creates before its first `apt-get update`.
    fn ensure_apt_dirs(&self) -> Result<(), DebstrapError> {
        for rel in ["var/lib/apt/lists/partial", "var/cache/apt/archives/partial", "var/lib/dpkg"] {
            let path = self.target.join(rel);
            std::fs::create_dir_all(&path).map_err(|e| DebstrapError::io(path.to_string(), e))?;
        }
        Ok(())
    }

    fn apt_dir_args(&self, subcommand: &[&str]) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = vec![
            "-o".into(),
            format!("Dir={}", self.target).into(),
            "-o".into(),
            format!("Dir::State={}/var/lib/apt", self.target).into(),
            "-o".into(),
            format!("Dir::Cache={}/var/cache/apt", self.target).into(),
            "-o".into(),
            format!(
                "APT::Install-Recommends={}",
                if self.recommends { "true" } else { "false" }
            )
            .into(),
        ];
        args.extend(subcommand.iter().map(std::ffi::OsString::from));
        args
    }

    fn run_tool(&self, program: &str, subcommand: &[&str]) -> Result<crate::executor::ExecutionResult, DebstrapError> {
        self.ensure_apt_dirs()?;
        let spec = CommandSpec::new(program, self.apt_dir_args(subcommand));
        self.executor
            .execute(&spec)
            .map_err(|e| DebstrapError::FetchFailed(format!("{program} {subcommand:?}: {e}")))
    }

    fn run_apt_get(&self, subcommand: &[&str]) -> Result<(), DebstrapError> {
        let result = self.run_tool("apt-get", subcommand)?;
        if !result.success() {
            return Err(DebstrapError::FetchFailed(format!(
                "apt-get {subcommand:?} exited {:?}",
                result.code()
            )));
        }
        Ok(())
    }

    /// Re-reads the set of available packages via `apt-cache dumpavail`,
    /// replacing `catalog` wholesale. Called by `update()` and, when dirty,
    /// by `open()` — this adapter never trusts long-lived in-memory state
    /// across a point where the on-disk apt database may have changed.
    fn reload_catalog(&mut self) -> Result<(), DebstrapError> {
        let result = self.run_tool("apt-cache", &["dumpavail"])?;
        if !result.success() {
            return Err(DebstrapError::FetchFailed(format!(
                "apt-cache dumpavail exited {:?}",
                result.code()
            )));
        }
        self.catalog = parse_available_packages(&String::from_utf8_lossy(&result.stdout));
        Ok(())
    }
}

/// Parses the RFC822-style stanzas `apt-cache dumpavail` emits (one per
/// package, separated by a blank line) into `Package` records.
fn parse_available_packages(output: &str) -> Vec<Package> {
    let mut packages = Vec::new();

    for stanza in output.split("\n\n") {
        if stanza.trim().is_empty() {
            continue;
        }

        let mut name = None;
        let mut version = None;
        let mut architecture = None;
        let mut priority_field = None;
        let mut essential = false;
        let mut multi_arch = MultiArch::No;

        for line in stanza.lines() {
            if line.starts_with(' ') || line.starts_with('\t') {
                continue; // continuation of a multi-line field (e.g. Description)
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key {
                "Package" => name = Some(value.to_string()),
                "Version" => version = Some(value.to_string()),
                "Architecture" => architecture = Some(value.to_string()),
                "Priority" => priority_field = Some(value.to_string()),
                "Essential" => essential = value.eq_ignore_ascii_case("yes"),
                "Multi-Arch" => {
                    multi_arch = match value {
                        "same" => MultiArch::Same,
                        "foreign" => MultiArch::Foreign,
                        "allowed" => MultiArch::Allowed,
                        _ => MultiArch::No,
                    };
                }
                _ => {}
            }
        }

        let (Some(name), Some(version), Some(architecture)) = (name, version, architecture) else {
            continue;
        };

        let priority = if essential {
            PriorityClass::Essential
        } else {
            match priority_field.as_deref() {
                Some("required") => PriorityClass::Required,
                Some("important") => PriorityClass::Important,
                Some("standard") => PriorityClass::Standard,
                _ => PriorityClass::Optional,
            }
        };

        packages.push(Package {
            name,
            version,
            architecture,
            priority,
            multi_arch,
            essential,
            archive_path: Utf8PathBuf::new(),
        });
    }

    packages
}

impl PackageIndex for AptCacheIndex {
    fn update(&mut self) -> Result<(), DebstrapError> {
        self.run_apt_get(&["update"])?;
        self.reload_catalog()?;
        self.dirty.set(false);
        Ok(())
    }

    fn open(&mut self) -> Result<(), DebstrapError> {
        if self.dirty.get() {
            self.reload_catalog()?;
            self.dirty.set(false);
        }
        Ok(())
    }

    fn filter_by_priority(&self, class: PriorityClass) -> Vec<Package> {
        self.catalog
            .iter()
            .filter(|p| p.priority <= class)
            .cloned()
            .collect()
    }

    fn mark_install(&mut self, name: &str) -> Result<(), DebstrapError> {
        let package = self
            .catalog
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| DebstrapError::UnknownPackage(name.to_string()))?;
        self.marked.insert(package.identity(), package);
        Ok(())
    }

    fn changes(&self) -> Vec<Package> {
        self.marked.values().cloned().collect()
    }

    fn fetch_archives(&mut self) -> Result<(), DebstrapError> {
        if self.marked.is_empty() {
            return Ok(());
        }
        let mut subcommand = vec!["-y", "--download-only", "install"];
        let names: Vec<&str> = self.marked.keys().map(String::as_str).collect();
        subcommand.extend(names);
        self.run_apt_get(&subcommand)
    }

    fn commit(&mut self) -> Result<(), DebstrapError> {
        if self.marked.is_empty() {
            return Ok(());
        }
        let mut subcommand = vec!["-y", "install"];
        let names: Vec<&str> = self.marked.keys().map(String::as_str).collect();
        subcommand.extend(names);
        self.run_apt_get(&subcommand)
    }

    fn archive_path(&self, package: &Package) -> Utf8PathBuf {
        let urlquoted_version = package.version.replace(':', "%3a");
        self.target.join("var/cache/apt/archives").join(format!(
            "{}_{}_{}.deb",
            package.name, urlquoted_version, package.architecture
        ))
    }
}

/// Convenience constructor for a `sources.list` line:
/// exactly one line, `deb <url> <suite> <components>`.
pub fn sources_list_line(url: &str, suite: &str, components: &[String]) -> String {
    format!("deb {} {} {}\n", url, suite, components.join(" "))
}

/// Writes `etc/apt/sources.list` under `target`.
pub fn write_sources_list(
    target: &Utf8Path,
    url: &str,
    suite: &str,
    components: &[String],
) -> Result<(), DebstrapError> {
    let path = target.join("etc/apt/sources.list");
    std::fs::write(&path, sources_list_line(url, suite, components))
        .map_err(|e| DebstrapError::io(path.to_string(), e))
}
