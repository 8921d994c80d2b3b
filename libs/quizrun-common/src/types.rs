use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Languages the execution core knows how to compile and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Cpp,
    Java,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::Javascript,
        Language::Cpp,
        Language::Java,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Cpp => "cpp",
            Language::Java => "java",
        }
    }

    /// Whether a separate compile step precedes execution
    pub fn is_compiled(&self) -> bool {
        matches!(self, Language::Cpp | Language::Java)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported language: '{0}'")]
pub struct UnsupportedLanguage(pub String);

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    /// Names are matched case-insensitively after trimming surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::Javascript),
            "cpp" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            _ => Err(UnsupportedLanguage(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_hidden: bool,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            is_hidden: false,
        }
    }
}

/// What a job does once its source is compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One run per test case, each compared against its expected output
    TestCases(Vec<TestCase>),
    /// A single run fed with the given stdin, no comparison
    CustomInput(String),
}

/// Input to one job. `language` is kept as received so that validation
/// happens inside the coordinator, before any filesystem activity.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub language: String,
    pub mode: ExecutionMode,
}

impl ExecutionRequest {
    pub fn with_test_cases(
        source_code: impl Into<String>,
        language: impl Into<String>,
        test_cases: Vec<TestCase>,
    ) -> Self {
        Self {
            source_code: source_code.into(),
            language: language.into(),
            mode: ExecutionMode::TestCases(test_cases),
        }
    }

    pub fn with_custom_input(
        source_code: impl Into<String>,
        language: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            source_code: source_code.into(),
            language: language.into(),
            mode: ExecutionMode::CustomInput(input.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Ran cleanly and the trimmed output matched
    Pass,
    /// Ran cleanly but produced different output
    Fail,
    /// Crashed, timed out, or could not be launched
    Error,
}

/// Verdict for one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub input: String,
    pub expected: String,
    #[serde(rename = "actual")]
    pub actual_output: String,
    pub status: OutcomeStatus,
    /// Diagnostic text for `Error` outcomes (stderr, timeout notice, launch failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Aggregate result of a test-case job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    #[serde(rename = "results")]
    pub outcomes: Vec<ExecutionOutcome>,
    pub passed_count: usize,
    pub total: usize,
    pub score: u32,
    pub success: bool,
}

impl JobResult {
    /// Computes the score as a rounded percentage of passing cases.
    ///
    /// An empty outcome list scores 0 and counts as a success, since every
    /// one of its zero cases passed.
    pub fn from_outcomes(outcomes: Vec<ExecutionOutcome>) -> Self {
        let total = outcomes.len();
        let passed_count = outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Pass)
            .count();
        let score = if total == 0 {
            0
        } else {
            (passed_count as f64 / total as f64 * 100.0).round() as u32
        };

        Self {
            outcomes,
            passed_count,
            total,
            score,
            success: passed_count == total,
        }
    }
}

/// Result of a single custom-input run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRunOutput {
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuizType {
    #[serde(rename = "Grand Test")]
    GrandTest,
    #[serde(rename = "Assignment")]
    Assignment,
    #[serde(rename = "Practice Test")]
    PracticeTest,
}

impl QuizType {
    /// Practice problems accept any number of submissions; graded ones accept one.
    pub fn allows_resubmission(&self) -> bool {
        matches!(self, QuizType::PracticeTest)
    }
}

/// The slice of a problem document that scoring needs. Fetched by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: String,
    pub quiz_type: QuizType,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

/// Persisted record of a student's scored attempt at a problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub problem: String,
    pub student: String,
    pub code: String,
    pub language: Language,
    pub results: Vec<ExecutionOutcome>,
    pub score: u32,
    pub success: bool,
    pub submitted_at: DateTime<Utc>,
    pub attempt_number: u32,
    pub last_attempt_at: DateTime<Utc>,
}
