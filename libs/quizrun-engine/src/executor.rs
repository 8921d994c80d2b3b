//! Execution job coordinator.
//!
//! Sequences one job end to end:
//! resolve language -> acquire workspace -> compile (if needed) ->
//! run each case -> aggregate -> release workspace.
//!
//! Release happens on every path out of [`JobCoordinator::execute`],
//! including compile failure and cancellation. Submission scoring adds the
//! attempt policy on top of the same pipeline.

use crate::config::{EngineConfig, Isolation, LanguageConfigManager};
use crate::error::JobError;
use crate::evaluator::{self, CompiledUnit};
use crate::runner::{self, DockerRunner, HostRunner, ProcessRunner};
use crate::store::SubmissionStore;
use crate::toolchain::{self, Toolchain};
use crate::workspace::{Workspace, WorkspaceManager};
use chrono::Utc;
use quizrun_common::types::{
    CustomRunOutput, ExecutionMode, ExecutionRequest, JobResult, Problem, Submission, TestCase,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const MAX_SOURCE_BYTES: usize = 1024 * 1024;
pub const MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Cooperative cancellation flag shared between a job and whoever started it
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutput {
    Tests(JobResult),
    Custom(CustomRunOutput),
}

pub struct JobCoordinator {
    runner: Arc<dyn ProcessRunner>,
    workspaces: WorkspaceManager,
    run_timeout: Duration,
    compile_timeout: Duration,
}

impl JobCoordinator {
    pub fn new(config: &EngineConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            workspaces: WorkspaceManager::new(config.workspace_root.clone()),
            run_timeout: config.run_timeout,
            compile_timeout: config.compile_timeout,
        }
    }

    /// Pick the isolation backend the config asks for
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let runner: Arc<dyn ProcessRunner> = match config.isolation {
            Isolation::Host => Arc::new(HostRunner::new(config.max_output_bytes)),
            Isolation::Docker => {
                let languages = LanguageConfigManager::load_or_default(&config.languages_config)?;
                Arc::new(DockerRunner::new(languages, config.max_output_bytes)?)
            }
        };
        info!(
            backend = runner.name(),
            workspace_root = %config.workspace_root.display(),
            run_timeout_ms = config.run_timeout.as_millis() as u64,
            "Job coordinator ready"
        );
        Ok(Self::new(config, runner))
    }

    pub fn backend(&self) -> &'static str {
        self.runner.name()
    }

    /// Run one job to completion
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        cancel: &CancelToken,
    ) -> Result<JobOutput, JobError> {
        // Both checks come before any filesystem activity
        let toolchain = toolchain::resolve(&request.language)?;
        validate(request)?;

        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let start = Instant::now();
        let mut workspace = self
            .workspaces
            .acquire(toolchain, &request.source_code)
            .await?;

        let test_count = match &request.mode {
            ExecutionMode::TestCases(cases) => cases.len(),
            ExecutionMode::CustomInput(_) => 1,
        };
        info!(
            job_id = %workspace.id(),
            language = %toolchain.language,
            test_count,
            "Starting job"
        );

        let result = self
            .execute_in(toolchain, &workspace, &request.mode, cancel)
            .await;
        workspace.release().await;

        let execution_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(JobOutput::Tests(job)) => info!(
                job_id = %workspace.id(),
                passed = job.passed_count,
                total = job.total,
                score = job.score,
                execution_ms,
                "Job completed"
            ),
            Ok(JobOutput::Custom(out)) => info!(
                job_id = %workspace.id(),
                errored = out.error.is_some(),
                execution_ms,
                "Custom run completed"
            ),
            Err(e) => info!(job_id = %workspace.id(), error = %e, execution_ms, "Job ended without results"),
        }

        result
    }

    async fn execute_in(
        &self,
        toolchain: &Toolchain,
        workspace: &Workspace,
        mode: &ExecutionMode,
        cancel: &CancelToken,
    ) -> Result<JobOutput, JobError> {
        let language = toolchain.language;

        if let Some(cmd) = toolchain.compile_command(workspace.id()) {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            if let Err(e) = runner::compile(
                self.runner.as_ref(),
                language,
                &cmd,
                workspace.dir(),
                self.compile_timeout,
            )
            .await
            {
                warn!(job_id = %workspace.id(), error = %e, "Compilation failed");
                return Err(e.into());
            }
            debug!(job_id = %workspace.id(), "Compiled");
        }

        let unit = CompiledUnit {
            runner: self.runner.as_ref(),
            language,
            command: toolchain.run_command(workspace.id()),
            work_dir: workspace.dir(),
            timeout: self.run_timeout,
        };

        match mode {
            ExecutionMode::TestCases(cases) => {
                let outcomes = evaluator::evaluate(&unit, cases, cancel).await?;
                Ok(JobOutput::Tests(JobResult::from_outcomes(outcomes)))
            }
            ExecutionMode::CustomInput(input) => {
                if cancel.is_cancelled() {
                    return Err(JobError::Cancelled);
                }
                Ok(JobOutput::Custom(evaluator::evaluate_custom(&unit, input).await))
            }
        }
    }

    /// `run`: compile once, judge every case
    pub async fn run_tests(
        &self,
        code: &str,
        language: &str,
        test_cases: Vec<TestCase>,
        cancel: &CancelToken,
    ) -> Result<JobResult, JobError> {
        let request = ExecutionRequest::with_test_cases(code, language, test_cases);
        match self.execute(&request, cancel).await? {
            JobOutput::Tests(result) => Ok(result),
            JobOutput::Custom(_) => Err(JobError::Infrastructure(
                "custom output returned for a test-case job".to_string(),
            )),
        }
    }

    /// `run-custom`: single run, raw output or error
    pub async fn run_custom(
        &self,
        code: &str,
        language: &str,
        input: &str,
        cancel: &CancelToken,
    ) -> Result<CustomRunOutput, JobError> {
        let request = ExecutionRequest::with_custom_input(code, language, input);
        match self.execute(&request, cancel).await? {
            JobOutput::Custom(output) => Ok(output),
            JobOutput::Tests(_) => Err(JobError::Infrastructure(
                "test results returned for a custom-input job".to_string(),
            )),
        }
    }

    /// `submit`: score against the problem's cases and record the attempt.
    ///
    /// Graded problems accept one submission per student. A repeat is
    /// rejected before anything runs. Practice problems overwrite the
    /// previous record and bump its attempt number.
    pub async fn submit(
        &self,
        store: &dyn SubmissionStore,
        problem: &Problem,
        student_id: &str,
        code: &str,
        language: &str,
        cancel: &CancelToken,
    ) -> Result<Submission, JobError> {
        let parsed_language = toolchain::resolve(language)?.language;

        let previous = store.find(&problem.id, student_id).await?;
        if previous.is_some() && !problem.quiz_type.allows_resubmission() {
            info!(
                problem_id = %problem.id,
                student_id = student_id,
                "Rejected repeat submission"
            );
            return Err(JobError::DuplicateSubmission);
        }

        let result = self
            .run_tests(code, language, problem.test_cases.clone(), cancel)
            .await?;

        let now = Utc::now();
        let submission = Submission {
            problem: problem.id.clone(),
            student: student_id.to_string(),
            code: code.to_string(),
            language: parsed_language,
            results: result.outcomes,
            score: result.score,
            success: result.success,
            submitted_at: now,
            attempt_number: previous.as_ref().map_or(1, |p| p.attempt_number + 1),
            last_attempt_at: now,
        };

        if problem.quiz_type.allows_resubmission() {
            store.upsert(&submission).await?;
        } else {
            // A concurrent first submission can still win between find and here
            store.insert_new(&submission).await?;
        }

        info!(
            problem_id = %problem.id,
            student_id = student_id,
            score = submission.score,
            attempt = submission.attempt_number,
            "Submission recorded"
        );
        Ok(submission)
    }
}

fn validate(request: &ExecutionRequest) -> Result<(), JobError> {
    if request.source_code.trim().is_empty() {
        return Err(JobError::InvalidRequest("Source code is empty".to_string()));
    }
    if request.source_code.len() > MAX_SOURCE_BYTES {
        return Err(JobError::InvalidRequest(format!(
            "Source code exceeds {} bytes",
            MAX_SOURCE_BYTES
        )));
    }

    let oversized = match &request.mode {
        ExecutionMode::TestCases(cases) => cases.iter().any(|c| c.input.len() > MAX_INPUT_BYTES),
        ExecutionMode::CustomInput(input) => input.len() > MAX_INPUT_BYTES,
    };
    if oversized {
        return Err(JobError::InvalidRequest(format!(
            "Input exceeds {} bytes",
            MAX_INPUT_BYTES
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{exited, ok, ScriptedRunner};
    use crate::store::InMemorySubmissionStore;
    use quizrun_common::types::{OutcomeStatus, QuizType};
    use std::path::Path;

    struct Harness {
        runner: Arc<ScriptedRunner>,
        coordinator: JobCoordinator,
        _root: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let config = EngineConfig {
                workspace_root: root.path().to_path_buf(),
                ..Default::default()
            };
            let runner = Arc::new(ScriptedRunner::new());
            let coordinator = JobCoordinator::new(&config, runner.clone());
            Self {
                runner,
                coordinator,
                _root: root,
            }
        }

        fn root(&self) -> &Path {
            self.coordinator.workspaces.root()
        }

        fn leftover_entries(&self) -> usize {
            std::fs::read_dir(self.root()).map_or(0, |d| d.count())
        }
    }

    fn problem(quiz_type: QuizType) -> Problem {
        Problem {
            id: "p-42".to_string(),
            quiz_type,
            test_cases: vec![TestCase::new("1", "1"), TestCase::new("2", "2")],
        }
    }

    #[tokio::test]
    async fn test_echo_job_passes() {
        let h = Harness::new();
        let result = h
            .coordinator
            .run_tests(
                "print(input())",
                "python",
                vec![TestCase::new("5", "5")],
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.outcomes[0].status, OutcomeStatus::Pass);
        assert_eq!(result.outcomes[0].actual_output, "5");
        assert_eq!(result.score, 100);
        assert!(result.success);
        assert_eq!(h.leftover_entries(), 0);
    }

    #[tokio::test]
    async fn test_compile_failure_runs_nothing() {
        let h = Harness::new();
        h.runner
            .push(Ok(exited(1, "main.cpp:1:5: error: expected ';' before '}' token")));

        let err = h
            .coordinator
            .run_tests(
                "int main() { return 0 }",
                "cpp",
                vec![TestCase::new("", "")],
                &CancelToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            JobError::Compile { details } => assert!(details.contains("expected ';'")),
            other => panic!("unexpected {:?}", other),
        }
        // Only the compiler was invoked
        assert_eq!(h.runner.calls(), 1);
        assert_eq!(h.leftover_entries(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_language_touches_nothing() {
        let h = Harness::new();
        let err = h
            .coordinator
            .run_tests("puts 1", "ruby", vec![], &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::UnsupportedLanguage(_)));
        assert_eq!(h.runner.calls(), 0);
        assert_eq!(h.leftover_entries(), 0);
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let h = Harness::new();
        let cancel = CancelToken::new();

        let err = h
            .coordinator
            .run_tests("   \n", "python", vec![], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidRequest(_)));

        let huge = "x".repeat(MAX_INPUT_BYTES + 1);
        let err = h
            .coordinator
            .run_custom("print(1)", "python", &huge, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidRequest(_)));
        assert_eq!(h.runner.calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_cases() {
        let h = Harness::new();
        let result = h
            .coordinator
            .run_tests("print(1)", "python", vec![], &CancelToken::new())
            .await
            .unwrap();

        assert!(result.outcomes.is_empty());
        assert_eq!(result.score, 0);
        assert!(result.success);
        assert_eq!(h.runner.calls(), 0);
    }

    #[tokio::test]
    async fn test_partial_score() {
        let h = Harness::new();
        h.runner.push(Ok(ok("1")));
        h.runner.push(Ok(ok("wrong")));
        h.runner.push(Ok(exited(1, "Traceback (most recent call last):")));

        let cases = vec![
            TestCase::new("1", "1"),
            TestCase::new("2", "2"),
            TestCase::new("3", "3"),
        ];
        let result = h
            .coordinator
            .run_tests("print(input())", "python", cases, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(result.passed_count, 1);
        assert_eq!(result.score, 33);
        assert!(!result.success);
        assert_eq!(result.outcomes[2].status, OutcomeStatus::Error);
    }

    #[tokio::test]
    async fn test_custom_run() {
        let h = Harness::new();
        let out = h
            .coordinator
            .run_custom("print(input())", "javascript", "hi\n", &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(out.output.as_deref(), Some("hi"));
        assert!(out.error.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let h = Harness::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = h
            .coordinator
            .run_tests("class Main {}", "java", vec![TestCase::new("", "")], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Cancelled));
        assert_eq!(h.runner.calls(), 0);
        assert_eq!(h.leftover_entries(), 0);
    }

    #[tokio::test]
    async fn test_graded_resubmission_rejected_before_running() {
        let h = Harness::new();
        let store = InMemorySubmissionStore::new();
        let problem = problem(QuizType::GrandTest);
        let cancel = CancelToken::new();

        let first = h
            .coordinator
            .submit(&store, &problem, "s-1", "print(input())", "python", &cancel)
            .await
            .unwrap();
        assert_eq!(first.score, 100);
        assert_eq!(first.attempt_number, 1);
        let calls_after_first = h.runner.calls();
        assert_eq!(calls_after_first, 2);

        let err = h
            .coordinator
            .submit(&store, &problem, "s-1", "print(input())", "python", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::DuplicateSubmission));
        assert_eq!(h.runner.calls(), calls_after_first);

        // A different student is unaffected
        h.coordinator
            .submit(&store, &problem, "s-2", "print(input())", "python", &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_practice_resubmission_overwrites() {
        let h = Harness::new();
        let store = InMemorySubmissionStore::new();
        let problem = problem(QuizType::PracticeTest);
        let cancel = CancelToken::new();

        h.runner.push(Ok(ok("nope")));
        h.runner.push(Ok(ok("nope")));
        let first = h
            .coordinator
            .submit(&store, &problem, "s-1", "print(0)", "python", &cancel)
            .await
            .unwrap();
        assert_eq!(first.score, 0);

        let second = h
            .coordinator
            .submit(&store, &problem, "s-1", "print(input())", "python", &cancel)
            .await
            .unwrap();
        assert_eq!(second.score, 100);

        let stored = store.find("p-42", "s-1").await.unwrap().unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(stored.attempt_number, 2);
        assert_eq!(stored.code, "print(input())");
        assert!(stored
            .results
            .iter()
            .all(|o| o.status == OutcomeStatus::Pass));
    }

    #[tokio::test]
    async fn test_submit_compile_error_records_nothing() {
        let h = Harness::new();
        let store = InMemorySubmissionStore::new();
        h.runner.push(Ok(exited(1, "error: expected expression")));

        let err = h
            .coordinator
            .submit(
                &store,
                &problem(QuizType::Assignment),
                "s-1",
                "int main( {",
                "cpp",
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Compile { .. }));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    #[ignore] // Requires python3 on PATH
    async fn test_real_python_echo() {
        let root = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            workspace_root: root.path().to_path_buf(),
            ..Default::default()
        };
        let coordinator = JobCoordinator::from_config(&config).unwrap();

        let result = coordinator
            .run_tests(
                "print(input())",
                "python",
                vec![TestCase::new("5", "5"), TestCase::new("hello", "hello")],
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.score, 100);
    }

    #[tokio::test]
    #[ignore] // Requires python3 on PATH
    async fn test_real_timeout_does_not_block_next_case() {
        let root = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            workspace_root: root.path().to_path_buf(),
            run_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let coordinator = JobCoordinator::from_config(&config).unwrap();
        let code = "x = input()\nwhile x == 'loop':\n    pass\nprint(x)";

        let start = Instant::now();
        let result = coordinator
            .run_tests(
                code,
                "python",
                vec![TestCase::new("loop", "loop"), TestCase::new("ok", "ok")],
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.outcomes[0].status, OutcomeStatus::Error);
        assert_eq!(result.outcomes[1].status, OutcomeStatus::Pass);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    #[ignore] // Requires g++ on PATH
    async fn test_real_cpp_syntax_error() {
        let root = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            workspace_root: root.path().to_path_buf(),
            ..Default::default()
        };
        let coordinator = JobCoordinator::from_config(&config).unwrap();

        let err = coordinator
            .run_tests(
                "int main() { return 0 }",
                "cpp",
                vec![TestCase::new("", "")],
                &CancelToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Compile { .. }));
    }

    fn host_coordinator(root: &Path) -> JobCoordinator {
        let config = EngineConfig {
            workspace_root: root.to_path_buf(),
            ..Default::default()
        };
        JobCoordinator::from_config(&config).unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires node on PATH
    async fn test_real_javascript_echo() {
        let root = tempfile::tempdir().unwrap();
        let code = "const s = require('fs').readFileSync(0, 'utf8');\nconsole.log(s.trim());";

        let result = host_coordinator(root.path())
            .run_tests(
                code,
                "javascript",
                vec![TestCase::new("5", "5"), TestCase::new("hello world", "hello world")],
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.score, 100);
    }

    #[tokio::test]
    #[ignore] // Requires g++ on PATH
    async fn test_real_cpp_echo() {
        let root = tempfile::tempdir().unwrap();
        let code = "#include <iostream>\n#include <string>\nint main() {\n    std::string line;\n    std::getline(std::cin, line);\n    std::cout << line << std::endl;\n    return 0;\n}\n";

        let result = host_coordinator(root.path())
            .run_tests(
                code,
                "cpp",
                vec![TestCase::new("42", "42"), TestCase::new("a b c", "a b c")],
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.score, 100);
    }

    #[tokio::test]
    #[ignore] // Requires javac and java on PATH
    async fn test_real_java_concurrent_jobs_stay_isolated() {
        let root = tempfile::tempdir().unwrap();
        let coordinator = host_coordinator(root.path());
        // Both jobs compile a class named Main; each must see only its own
        let java = |prefix: &str| {
            format!(
                "import java.util.Scanner;\npublic class Main {{\n    public static void main(String[] args) {{\n        Scanner in = new Scanner(System.in);\n        System.out.println(\"{}\" + in.nextLine());\n    }}\n}}\n",
                prefix
            )
        };
        let (code_a, code_b) = (java("A:"), java("B:"));
        let cancel = CancelToken::new();

        let (a, b) = tokio::join!(
            coordinator.run_tests(&code_a, "java", vec![TestCase::new("1", "A:1")], &cancel),
            coordinator.run_tests(&code_b, "java", vec![TestCase::new("1", "B:1")], &cancel),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.outcomes[0].actual_output, "A:1");
        assert_eq!(b.outcomes[0].actual_output, "B:1");
        assert_eq!(a.score, 100);
        assert_eq!(b.score, 100);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
