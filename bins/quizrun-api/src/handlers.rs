// HTTP route handlers for the quizrun API

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use quizrun_common::types::{ExecutionOutcome, Problem, TestCase};
use quizrun_engine::JobError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub results: Vec<ExecutionOutcome>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCustomRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub custom_input: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub problem: Problem,
    pub student_id: String,
    pub code: String,
    pub language: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub message: String,
    pub score: u32,
    pub success: bool,
    pub results: Vec<ExecutionOutcome>,
}

/// Job-level failures become 4xx (caller's fault) or 500 (ours)
fn error_response(err: &JobError) -> Response {
    match err {
        JobError::Compile { details } => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "Compilation error",
                "details": details,
            })),
        )
            .into_response(),
        JobError::UnsupportedLanguage(_)
        | JobError::InvalidRequest(_)
        | JobError::DuplicateSubmission => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
        JobError::Cancelled => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "Server is shutting down" })),
        )
            .into_response(),
        JobError::Infrastructure(_) => {
            error!(error = %err, "Job failed on infrastructure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Execution failed" })),
            )
                .into_response()
        }
    }
}

/// POST /run - Judge code against caller-supplied test cases
pub async fn run_tests(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RunRequest>,
) -> Response {
    let start = Instant::now();
    let result = state
        .coordinator
        .run_tests(
            &payload.code,
            &payload.language,
            payload.test_cases,
            &state.shutdown,
        )
        .await;

    metrics::record_job(
        "run",
        metrics::outcome_label(result.as_ref().map(|_| ())),
        start.elapsed(),
    );

    match result {
        Ok(job) => {
            metrics::record_verdicts(&job.outcomes);
            (
                StatusCode::OK,
                Json(RunResponse {
                    results: job.outcomes,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// POST /run-custom - Single run with custom stdin, no verdict
pub async fn run_custom(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RunCustomRequest>,
) -> Response {
    let start = Instant::now();
    let result = state
        .coordinator
        .run_custom(
            &payload.code,
            &payload.language,
            &payload.custom_input,
            &state.shutdown,
        )
        .await;

    metrics::record_job(
        "run_custom",
        metrics::outcome_label(result.as_ref().map(|_| ())),
        start.elapsed(),
    );

    match result {
        Ok(output) => (StatusCode::OK, Json(output)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /submit - Score against the problem's cases and record the attempt
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    let start = Instant::now();
    let result = state
        .coordinator
        .submit(
            state.store.as_ref(),
            &payload.problem,
            &payload.student_id,
            &payload.code,
            &payload.language,
            &state.shutdown,
        )
        .await;

    metrics::record_job(
        "submit",
        metrics::outcome_label(result.as_ref().map(|_| ())),
        start.elapsed(),
    );

    match result {
        Ok(submission) => {
            info!(
                problem_id = %submission.problem,
                student_id = %submission.student,
                score = submission.score,
                "Submission scored"
            );
            metrics::record_verdicts(&submission.results);
            (
                StatusCode::OK,
                Json(SubmitResponse {
                    message: "Submission processed successfully".to_string(),
                    score: submission.score,
                    success: submission.success,
                    results: submission.results,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_text() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
