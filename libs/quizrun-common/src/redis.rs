use crate::types::Submission;
use redis::{AsyncCommands, RedisResult};

// Redis key scheme for persisted submissions.
// One key per (problem, student) pair, so the attempt policy reduces to
// "does this key exist" and create-if-absent maps onto SET NX.

pub const SUBMISSION_PREFIX: &str = "quizrun:submission";

/// Deterministic key for a student's submission to a problem.
///
/// The problem id is length-prefixed so ids containing `:` cannot make two
/// distinct pairs share a key.
pub fn submission_key(problem_id: &str, student_id: &str) -> String {
    format!(
        "{}:{}:{}:{}",
        SUBMISSION_PREFIX,
        problem_id.len(),
        problem_id,
        student_id
    )
}

fn encode(submission: &Submission) -> RedisResult<String> {
    serde_json::to_string(submission).map_err(|e| {
        redis::RedisError::from((
            redis::ErrorKind::TypeError,
            "serialization error",
            e.to_string(),
        ))
    })
}

/// Fetch the stored submission, if any
pub async fn get_submission(
    conn: &mut redis::aio::ConnectionManager,
    problem_id: &str,
    student_id: &str,
) -> RedisResult<Option<Submission>> {
    let key = submission_key(problem_id, student_id);
    let payload: Option<String> = conn.get(&key).await?;

    match payload {
        Some(data) => {
            let submission: Submission = serde_json::from_str(&data).map_err(|e| {
                redis::RedisError::from((
                    redis::ErrorKind::TypeError,
                    "deserialization error",
                    e.to_string(),
                ))
            })?;
            Ok(Some(submission))
        }
        None => Ok(None),
    }
}

/// Store a submission, overwriting any previous one
pub async fn put_submission(
    conn: &mut redis::aio::ConnectionManager,
    submission: &Submission,
) -> RedisResult<()> {
    let key = submission_key(&submission.problem, &submission.student);
    let payload = encode(submission)?;
    conn.set(&key, payload).await
}

/// Store a submission only if none exists yet.
/// Returns false when a record was already present (nothing written).
pub async fn put_submission_if_absent(
    conn: &mut redis::aio::ConnectionManager,
    submission: &Submission,
) -> RedisResult<bool> {
    let key = submission_key(&submission.problem, &submission.student);
    let payload = encode(submission)?;
    conn.set_nx(&key, payload).await
}
