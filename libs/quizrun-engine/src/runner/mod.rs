//! Sandboxed process runner.
//!
//! [`ProcessRunner`] is the isolation seam: a backend takes a command, a
//! working directory, stdin and a timeout, and hands back raw captured
//! output. It never decides what the output means.
//!
//! [`compile`] and [`run`] sit on top of any backend and classify raw
//! output into the compile/run error taxonomy.

pub mod docker;
pub mod host;

use crate::error::{CompileError, RunError};
use crate::toolchain::CommandSpec;
use async_trait::async_trait;
use quizrun_common::types::Language;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

pub use docker::DockerRunner;
pub use host::HostRunner;

/// Unclassified result of one child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    /// None when the process was killed before reporting one
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    /// Output beyond the configured cap was discarded
    pub truncated: bool,
    pub execution_time_ms: u64,
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Run `cmd` rooted at `work_dir`, feeding `stdin` and closing it, and
    /// enforce `timeout` by killing everything the command spawned.
    ///
    /// `Err` means the process could not be launched at all.
    async fn execute(
        &self,
        language: Language,
        cmd: &CommandSpec,
        work_dir: &Path,
        stdin: &str,
        timeout: Duration,
    ) -> anyhow::Result<RawOutput>;
}

/// Captured output of a run that completed cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub truncated: bool,
}

/// Stderr fragments that mean the program died even if it exited 0
const RUNTIME_ERROR_SIGNATURES: &[&str] = &[
    "Traceback (most recent call last)",
    "Exception in thread",
    "Segmentation fault",
    "terminate called after throwing",
    "Uncaught ",
];

/// JVM banner that is noise, not an error
const JAVA_TOOL_OPTIONS_BANNER: &str = "Picked up JAVA_TOOL_OPTIONS";

pub fn looks_like_runtime_error(stderr: &str) -> bool {
    if RUNTIME_ERROR_SIGNATURES.iter().any(|sig| stderr.contains(sig)) {
        return true;
    }
    // Node's uncaught error: a "...Error: msg" line followed by "    at ..." frames
    let mut lines = stderr.lines();
    while let Some(line) = lines.next() {
        if line.contains("Error:") && lines.clone().any(|l| l.trim_start().starts_with("at ")) {
            return true;
        }
    }
    false
}

fn strip_banner(stderr: &str) -> String {
    if !stderr.contains(JAVA_TOOL_OPTIONS_BANNER) {
        return stderr.to_string();
    }
    stderr
        .lines()
        .filter(|line| !line.trim().starts_with(JAVA_TOOL_OPTIONS_BANNER))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Annotate exit codes that carry a well-known meaning
fn annotate_exit(stderr: &mut String, exit_code: Option<i64>) {
    let note = match exit_code {
        Some(137) => "[Process killed: likely exceeded memory limit]",
        Some(139) => "[Process killed: segmentation fault]",
        _ => return,
    };
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str(note);
}

/// Compile step. Any non-zero exit, timeout, or launch failure is fatal
/// for the job.
pub async fn compile(
    runner: &dyn ProcessRunner,
    language: Language,
    cmd: &CommandSpec,
    work_dir: &Path,
    timeout: Duration,
) -> Result<(), CompileError> {
    debug!(backend = runner.name(), command = ?cmd.to_vec(), "Compiling");

    let raw = runner
        .execute(language, cmd, work_dir, "", timeout)
        .await
        .map_err(|e| CompileError::Launch(format!("{:#}", e)))?;

    if raw.timed_out {
        warn!(limit_ms = timeout.as_millis() as u64, "Compilation timed out");
        return Err(CompileError::Timeout {
            limit_ms: timeout.as_millis() as u64,
        });
    }
    if raw.exit_code != Some(0) {
        return Err(CompileError::Failed {
            exit_code: raw.exit_code,
            stdout: raw.stdout,
            stderr: strip_banner(&raw.stderr),
        });
    }

    debug!(execution_ms = raw.execution_time_ms, "Compilation succeeded");
    Ok(())
}

/// Run step. Non-zero exit, a runtime-error signature in stderr, a timeout,
/// or a launch failure is an error; other stderr is passed through.
pub async fn run(
    runner: &dyn ProcessRunner,
    language: Language,
    cmd: &CommandSpec,
    work_dir: &Path,
    stdin: &str,
    timeout: Duration,
) -> Result<ProcessOutput, RunError> {
    let raw = runner
        .execute(language, cmd, work_dir, stdin, timeout)
        .await
        .map_err(|e| RunError::Launch(format!("{:#}", e)))?;

    let mut stderr = strip_banner(&raw.stderr);

    if raw.timed_out {
        return Err(RunError::Timeout {
            limit_ms: timeout.as_millis() as u64,
            stdout: raw.stdout,
            stderr,
            execution_time_ms: raw.execution_time_ms,
        });
    }

    if raw.exit_code != Some(0) || looks_like_runtime_error(&stderr) {
        annotate_exit(&mut stderr, raw.exit_code);
        return Err(RunError::Crash {
            exit_code: raw.exit_code,
            stdout: raw.stdout,
            stderr,
            execution_time_ms: raw.execution_time_ms,
        });
    }

    Ok(ProcessOutput {
        stdout: raw.stdout,
        stderr,
        execution_time_ms: raw.execution_time_ms,
        truncated: raw.truncated,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backend for tests that must not depend on installed toolchains

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays queued responses; echoes stdin once the queue is empty.
    /// Counts every invocation.
    #[derive(Default)]
    pub struct ScriptedRunner {
        pub calls: AtomicUsize,
        pub seen_stdin: Mutex<Vec<String>>,
        responses: Mutex<VecDeque<anyhow::Result<RawOutput>>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, response: anyhow::Result<RawOutput>) -> &Self {
            self.responses.lock().unwrap().push_back(response);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    pub fn ok(stdout: &str) -> RawOutput {
        RawOutput {
            stdout: stdout.to_string(),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn exited(code: i64, stderr: &str) -> RawOutput {
        RawOutput {
            stderr: stderr.to_string(),
            exit_code: Some(code),
            ..Default::default()
        }
    }

    pub fn timed_out() -> RawOutput {
        RawOutput {
            timed_out: true,
            execution_time_ms: 1000,
            ..Default::default()
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute(
            &self,
            _language: Language,
            _cmd: &CommandSpec,
            _work_dir: &Path,
            stdin: &str,
            _timeout: Duration,
        ) -> anyhow::Result<RawOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_stdin.lock().unwrap().push(stdin.to_string());
            match self.responses.lock().unwrap().pop_front() {
                Some(response) => response,
                None => Ok(ok(stdin)),
            }
        }
    }
}
