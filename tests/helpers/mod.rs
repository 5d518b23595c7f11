#![allow(dead_code)]

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Mutex;

use debstrap::executor::{CommandExecutor, CommandSpec, ExecutionResult};

/// Record-and-replay [`CommandExecutor`]: every call is appended to
/// `calls()` for later assertions, and `stdout_for` lets a test script a
/// canned response per program name (e.g. `apt-cache` returning a
/// `dumpavail` stanza) without a real apt install. Commands with no
/// scripted response succeed with empty output, mirroring the inline
/// per-file stub executors used throughout `src/`.
pub struct RecordingExecutor {
    responses: HashMap<String, (i32, Vec<u8>)>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Scripts `program`'s next (and every subsequent) invocation to exit
    /// `code` with `stdout`.
    pub fn respond(mut self, program: &str, code: i32, stdout: impl Into<Vec<u8>>) -> Self {
        self.responses.insert(program.to_string(), (code, stdout.into()));
        self
    }

    /// Full argv of every call made so far, in order, `command` first.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, program: &str) -> usize {
        self.calls().iter().filter(|c| c[0] == program).count()
    }
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor for RecordingExecutor {
    fn execute(&self, spec: &CommandSpec) -> anyhow::Result<ExecutionResult> {
        let mut argv = vec![spec.command.clone()];
        argv.extend(spec.args.iter().map(|a| a.to_string_lossy().to_string()));
        self.calls.lock().unwrap().push(argv);

        let (code, stdout) = self
            .responses
            .get(&spec.command)
            .cloned()
            .unwrap_or((0, Vec::new()));

        Ok(ExecutionResult {
            status: Some(ExitStatus::from_raw(code << 8)),
            stdout,
            stderr: Vec::new(),
        })
    }
}

/// A minimal `apt-cache dumpavail` stanza set covering one essential
/// package and one package a test might request by name.
pub const SAMPLE_DUMPAVAIL: &[u8] = b"\
Package: base-files
Priority: required
Architecture: amd64
Version: 12.4
Multi-Arch: no
Essential: yes

Package: systemd
Priority: important
Architecture: amd64
Version: 252.22-1
Multi-Arch: no

";
