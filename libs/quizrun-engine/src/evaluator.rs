//! Test Harness / Verdict Engine
//!
//! **Core Responsibility:**
//! Drive the runner once per test case and turn each run into a verdict.
//!
//! **Verdict Rules:**
//! - `error`: the run crashed, timed out, or could not be launched
//! - `pass`: the run succeeded and trimmed stdout equals trimmed expected output
//! - `fail`: anything else
//!
//! **Normalization:**
//! - Trim leading and trailing whitespace: YES
//! - Collapse internal whitespace: NO
//! - Case sensitivity: YES
//! - Numeric tolerance: NO
//!
//! Cases run strictly in input order, one at a time. A failing case never
//! stops the ones after it. Hidden cases are evaluated like any other.

use crate::executor::CancelToken;
use crate::error::{JobError, RunError};
use crate::runner::{self, ProcessOutput, ProcessRunner};
use crate::toolchain::CommandSpec;
use quizrun_common::types::{CustomRunOutput, ExecutionOutcome, OutcomeStatus, TestCase};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// The sole normalization applied before comparison
pub fn normalize_output(output: &str) -> &str {
    output.trim()
}

/// A compiled (or interpreted) program ready to be run repeatedly
pub struct CompiledUnit<'a> {
    pub runner: &'a dyn ProcessRunner,
    pub language: quizrun_common::types::Language,
    pub command: CommandSpec,
    pub work_dir: &'a Path,
    pub timeout: Duration,
}

impl<'a> CompiledUnit<'a> {
    async fn run(&self, stdin: &str) -> Result<ProcessOutput, RunError> {
        runner::run(
            self.runner,
            self.language,
            &self.command,
            self.work_dir,
            stdin,
            self.timeout,
        )
        .await
    }
}

/// Classify one finished run against its test case
pub fn judge(test_case: &TestCase, run: Result<ProcessOutput, RunError>) -> ExecutionOutcome {
    match run {
        Ok(output) => {
            let status = if normalize_output(&output.stdout)
                == normalize_output(&test_case.expected_output)
            {
                OutcomeStatus::Pass
            } else {
                OutcomeStatus::Fail
            };
            ExecutionOutcome {
                input: test_case.input.clone(),
                expected: test_case.expected_output.clone(),
                actual_output: normalize_output(&output.stdout).to_string(),
                status,
                error: None,
                execution_time_ms: output.execution_time_ms,
                truncated: output.truncated,
            }
        }
        Err(err) => ExecutionOutcome {
            input: test_case.input.clone(),
            expected: test_case.expected_output.clone(),
            actual_output: normalize_output(err.partial_stdout()).to_string(),
            status: OutcomeStatus::Error,
            error: Some(err.diagnostic()),
            execution_time_ms: err.execution_time_ms(),
            truncated: false,
        },
    }
}

/// Evaluate every test case in order. Returns one outcome per case unless
/// the job is cancelled part-way.
pub async fn evaluate(
    unit: &CompiledUnit<'_>,
    test_cases: &[TestCase],
    cancel: &CancelToken,
) -> Result<Vec<ExecutionOutcome>, JobError> {
    let mut outcomes = Vec::with_capacity(test_cases.len());

    for (idx, test_case) in test_cases.iter().enumerate() {
        if cancel.is_cancelled() {
            debug!(
                completed = outcomes.len(),
                total = test_cases.len(),
                "Cancelled between test cases"
            );
            return Err(JobError::Cancelled);
        }

        let outcome = judge(test_case, unit.run(&test_case.input).await);
        debug!(
            case = idx + 1,
            hidden = test_case.is_hidden,
            status = ?outcome.status,
            execution_ms = outcome.execution_time_ms,
            "Test case judged"
        );
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

/// Single run with caller-supplied stdin. No expected output, no verdict.
pub async fn evaluate_custom(unit: &CompiledUnit<'_>, input: &str) -> CustomRunOutput {
    match unit.run(input).await {
        Ok(output) => CustomRunOutput {
            output: Some(normalize_output(&output.stdout).to_string()),
            error: None,
            execution_time_ms: output.execution_time_ms,
        },
        Err(err) => CustomRunOutput {
            output: None,
            error: Some(err.diagnostic()),
            execution_time_ms: err.execution_time_ms(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{exited, ok, timed_out, ScriptedRunner};
    use crate::runner::RawOutput;
    use quizrun_common::types::Language;

    fn unit<'a>(runner: &'a ScriptedRunner) -> CompiledUnit<'a> {
        CompiledUnit {
            runner,
            language: Language::Python,
            command: CommandSpec::new("python3").with_args(["main.py"]),
            work_dir: Path::new("."),
            timeout: Duration::from_secs(1),
        }
    }

    fn output(stdout: &str) -> ProcessOutput {
        ProcessOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            execution_time_ms: 3,
            truncated: false,
        }
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("hello"), "hello");
        assert_eq!(normalize_output("  hello  "), "hello");
        assert_eq!(normalize_output("\nhello\r\n"), "hello");
        assert_eq!(normalize_output("a  b\n c"), "a  b\n c");
        assert_eq!(normalize_output("   "), "");
    }

    #[test]
    fn test_judge_pass_with_whitespace() {
        let outcome = judge(&TestCase::new("5", " 120\n"), Ok(output("120\n\n")));
        assert_eq!(outcome.status, OutcomeStatus::Pass);
        assert_eq!(outcome.actual_output, "120");
        assert_eq!(outcome.execution_time_ms, 3);
    }

    #[test]
    fn test_judge_no_internal_collapse() {
        let outcome = judge(&TestCase::new("", "1 2"), Ok(output("1  2")));
        assert_eq!(outcome.status, OutcomeStatus::Fail);
    }

    #[test]
    fn test_judge_case_sensitive() {
        let outcome = judge(&TestCase::new("", "Hello"), Ok(output("hello")));
        assert_eq!(outcome.status, OutcomeStatus::Fail);
    }

    #[test]
    fn test_judge_error_keeps_diagnostic() {
        let err = RunError::Crash {
            exit_code: Some(1),
            stdout: "12".to_string(),
            stderr: "IndexError: list index out of range".to_string(),
            execution_time_ms: 17,
        };
        let outcome = judge(&TestCase::new("x", "12"), Err(err));
        // Matching partial output does not rescue a crash
        assert_eq!(outcome.status, OutcomeStatus::Error);
        assert_eq!(outcome.actual_output, "12");
        assert_eq!(
            outcome.error.as_deref(),
            Some("IndexError: list index out of range")
        );
        assert_eq!(outcome.execution_time_ms, 17);
    }

    #[tokio::test]
    async fn test_evaluate_preserves_order_and_continues_after_errors() {
        let runner = ScriptedRunner::new();
        runner.push(Ok(ok("a")));
        runner.push(Ok(timed_out()));
        runner.push(Ok(exited(1, "boom")));
        runner.push(Ok(ok("wrong")));
        runner.push(Ok(ok("e")));

        let cases: Vec<TestCase> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|s| TestCase::new(*s, *s))
            .collect();

        let outcomes = evaluate(&unit(&runner), &cases, &CancelToken::new())
            .await
            .unwrap();

        let inputs: Vec<&str> = outcomes.iter().map(|o| o.input.as_str()).collect();
        assert_eq!(inputs, vec!["a", "b", "c", "d", "e"]);
        let statuses: Vec<OutcomeStatus> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![
                OutcomeStatus::Pass,
                OutcomeStatus::Error,
                OutcomeStatus::Error,
                OutcomeStatus::Fail,
                OutcomeStatus::Pass,
            ]
        );
        // Failed cases still report how long they ran
        assert_eq!(outcomes[1].execution_time_ms, 1000);
        assert_eq!(runner.calls(), 5);
        assert_eq!(
            *runner.seen_stdin.lock().unwrap(),
            vec!["a", "b", "c", "d", "e"]
        );
    }

    #[tokio::test]
    async fn test_evaluate_empty() {
        let runner = ScriptedRunner::new();
        let outcomes = evaluate(&unit(&runner), &[], &CancelToken::new())
            .await
            .unwrap();
        assert!(outcomes.is_empty());
        assert_eq!(runner.calls(), 0);
    }

    #[tokio::test]
    async fn test_hidden_cases_are_judged() {
        let runner = ScriptedRunner::new();
        let mut hidden = TestCase::new("7", "7");
        hidden.is_hidden = true;

        let outcomes = evaluate(&unit(&runner), &[hidden], &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(outcomes[0].status, OutcomeStatus::Pass);
    }

    #[tokio::test]
    async fn test_evaluate_cancelled() {
        let runner = ScriptedRunner::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = evaluate(&unit(&runner), &[TestCase::new("1", "1")], &cancel).await;
        assert!(matches!(result, Err(JobError::Cancelled)));
        assert_eq!(runner.calls(), 0);
    }

    #[tokio::test]
    async fn test_evaluate_custom() {
        let runner = ScriptedRunner::new();
        runner.push(Ok(ok("out\n")));
        runner.push(Ok(RawOutput {
            execution_time_ms: 12,
            ..exited(1, "Segfault-ish")
        }));

        let first = evaluate_custom(&unit(&runner), "in").await;
        assert_eq!(first.output.as_deref(), Some("out"));
        assert!(first.error.is_none());

        let second = evaluate_custom(&unit(&runner), "in").await;
        assert!(second.output.is_none());
        assert_eq!(second.error.as_deref(), Some("Segfault-ish"));
        assert_eq!(second.execution_time_ms, 12);
    }
}
