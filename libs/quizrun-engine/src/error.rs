use quizrun_common::types::UnsupportedLanguage;

/// Job-level failures. Each of these means no meaningful partial result
/// exists, so they are returned as errors rather than as outcome data.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    UnsupportedLanguage(#[from] UnsupportedLanguage),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Compilation error")]
    Compile { details: String },

    #[error("You have already submitted this problem.")]
    DuplicateSubmission,

    #[error("Job cancelled")]
    Cancelled,

    #[error("Execution infrastructure failure: {0}")]
    Infrastructure(String),
}

impl From<CompileError> for JobError {
    fn from(e: CompileError) -> Self {
        JobError::Compile {
            details: e.details(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Compiler exited with code {exit_code:?}")]
    Failed {
        exit_code: Option<i64>,
        stdout: String,
        stderr: String,
    },

    #[error("Compilation timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("Failed to launch compiler: {0}")]
    Launch(String),
}

impl CompileError {
    /// Human-readable diagnostic. Prefers the compiler's stderr, falls back
    /// to stdout (some toolchains report there), then to the error itself.
    pub fn details(&self) -> String {
        match self {
            CompileError::Failed { stdout, stderr, .. } => {
                if !stderr.trim().is_empty() {
                    stderr.trim().to_string()
                } else if !stdout.trim().is_empty() {
                    stdout.trim().to_string()
                } else {
                    self.to_string()
                }
            }
            other => other.to_string(),
        }
    }
}

/// Failure of a single run step. Scoped to one test case: the harness turns
/// it into an `error` outcome and moves on.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    #[error("Execution timed out after {limit_ms}ms")]
    Timeout {
        limit_ms: u64,
        stdout: String,
        stderr: String,
        execution_time_ms: u64,
    },

    #[error("Runtime error (exit code {exit_code:?})")]
    Crash {
        exit_code: Option<i64>,
        stdout: String,
        stderr: String,
        execution_time_ms: u64,
    },

    #[error("Failed to launch program: {0}")]
    Launch(String),
}

impl RunError {
    /// Whatever the program printed before it failed
    pub fn partial_stdout(&self) -> &str {
        match self {
            RunError::Timeout { stdout, .. } | RunError::Crash { stdout, .. } => stdout,
            RunError::Launch(_) => "",
        }
    }

    /// Wall time the program ran before it failed; zero if it never started
    pub fn execution_time_ms(&self) -> u64 {
        match self {
            RunError::Timeout {
                execution_time_ms, ..
            }
            | RunError::Crash {
                execution_time_ms, ..
            } => *execution_time_ms,
            RunError::Launch(_) => 0,
        }
    }

    /// Diagnostic text carried alongside an `error` outcome
    pub fn diagnostic(&self) -> String {
        match self {
            RunError::Crash { stderr, .. } if !stderr.trim().is_empty() => {
                stderr.trim().to_string()
            }
            RunError::Timeout { stderr, .. } if !stderr.trim().is_empty() => {
                format!("{}\n{}", self, stderr.trim())
            }
            other => other.to_string(),
        }
    }
}

/// Internal, best-effort. Only acquisition failures ever leave this crate
/// (as [`JobError::Infrastructure`]); cleanup failures are logged.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Failed to create workspace directory {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write source file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<WorkspaceError> for JobError {
    fn from(e: WorkspaceError) -> Self {
        JobError::Infrastructure(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_details_prefers_stderr() {
        let err = CompileError::Failed {
            exit_code: Some(1),
            stdout: "noise".to_string(),
            stderr: "main.cpp:1: error: expected ';'\n".to_string(),
        };
        assert_eq!(err.details(), "main.cpp:1: error: expected ';'");
    }

    #[test]
    fn test_compile_details_falls_back() {
        let err = CompileError::Failed {
            exit_code: Some(2),
            stdout: " ".to_string(),
            stderr: String::new(),
        };
        assert_eq!(err.details(), "Compiler exited with code Some(2)");

        let err = CompileError::Timeout { limit_ms: 5000 };
        let job: JobError = err.into();
        match job {
            JobError::Compile { details } => {
                assert_eq!(details, "Compilation timed out after 5000ms")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_run_error_diagnostic() {
        let crash = RunError::Crash {
            exit_code: Some(1),
            stdout: "partial".to_string(),
            stderr: "ZeroDivisionError: division by zero\n".to_string(),
            execution_time_ms: 42,
        };
        assert_eq!(crash.diagnostic(), "ZeroDivisionError: division by zero");
        assert_eq!(crash.partial_stdout(), "partial");
        assert_eq!(crash.execution_time_ms(), 42);

        let timeout = RunError::Timeout {
            limit_ms: 100,
            stdout: String::new(),
            stderr: String::new(),
            execution_time_ms: 104,
        };
        assert_eq!(timeout.diagnostic(), "Execution timed out after 100ms");

        let launch = RunError::Launch("no such file".to_string());
        assert_eq!(launch.partial_stdout(), "");
        assert_eq!(launch.execution_time_ms(), 0);
        assert!(launch.diagnostic().contains("no such file"));
    }
}
