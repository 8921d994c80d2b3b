// Prometheus metrics for the HTTP surface, served as text on GET /metrics

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use quizrun_common::types::{ExecutionOutcome, OutcomeStatus};
use quizrun_engine::JobError;
use std::time::Duration;

lazy_static! {
    pub static ref JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quizrun_jobs_total",
        "Jobs handled, by operation and outcome",
        &["operation", "outcome"]
    )
    .expect("quizrun_jobs_total registers once");
    pub static ref CASE_VERDICTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quizrun_case_verdicts_total",
        "Per test case verdicts",
        &["status"]
    )
    .expect("quizrun_case_verdicts_total registers once");
    pub static ref JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "quizrun_job_duration_seconds",
        "Wall time of a job from request to response",
        &["operation"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("quizrun_job_duration_seconds registers once");
}

pub fn outcome_label(result: Result<(), &JobError>) -> &'static str {
    match result {
        Ok(()) => "ok",
        Err(JobError::UnsupportedLanguage(_)) => "unsupported_language",
        Err(JobError::InvalidRequest(_)) => "invalid_request",
        Err(JobError::Compile { .. }) => "compile_error",
        Err(JobError::DuplicateSubmission) => "duplicate",
        Err(JobError::Cancelled) => "cancelled",
        Err(JobError::Infrastructure(_)) => "infrastructure_error",
    }
}

pub fn record_job(operation: &str, outcome: &str, elapsed: Duration) {
    JOBS_TOTAL.with_label_values(&[operation, outcome]).inc();
    JOB_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(elapsed.as_secs_f64());
}

pub fn record_verdicts(outcomes: &[ExecutionOutcome]) {
    for outcome in outcomes {
        let status = match outcome.status {
            OutcomeStatus::Pass => "pass",
            OutcomeStatus::Fail => "fail",
            OutcomeStatus::Error => "error",
        };
        CASE_VERDICTS_TOTAL.with_label_values(&[status]).inc();
    }
}

/// Render the default registry in the text exposition format
pub fn render() -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizrun_common::types::UnsupportedLanguage;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome_label(Ok(())), "ok");
        assert_eq!(
            outcome_label(Err(&JobError::Compile {
                details: String::new()
            })),
            "compile_error"
        );
        assert_eq!(
            outcome_label(Err(&JobError::from(UnsupportedLanguage("go".to_string())))),
            "unsupported_language"
        );
    }

    #[test]
    fn test_render_includes_recorded_job() {
        record_job("run", "ok", Duration::from_millis(20));
        let text = render().unwrap();
        assert!(text.contains("quizrun_jobs_total"));
        assert!(text.contains("quizrun_job_duration_seconds"));
    }
}
