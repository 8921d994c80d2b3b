//! Submission persistence seam.
//!
//! The coordinator only needs three things from storage: look up an
//! existing attempt, overwrite it, or create it if (and only if) none
//! exists. The last one must be atomic so two racing first submissions
//! cannot both be recorded.

use crate::error::JobError;
use async_trait::async_trait;
use quizrun_common::redis as keys;
use quizrun_common::types::Submission;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("A submission already exists for this student and problem")]
    Duplicate,

    #[error("Submission store error: {0}")]
    Backend(String),
}

impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate => JobError::DuplicateSubmission,
            StoreError::Backend(msg) => JobError::Infrastructure(msg),
        }
    }
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn find(&self, problem_id: &str, student_id: &str)
        -> Result<Option<Submission>, StoreError>;

    /// Insert or overwrite
    async fn upsert(&self, submission: &Submission) -> Result<(), StoreError>;

    /// Insert only; [`StoreError::Duplicate`] if a record exists
    async fn insert_new(&self, submission: &Submission) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemorySubmissionStore {
    records: Mutex<HashMap<(String, String), Submission>>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

fn record_key(submission: &Submission) -> (String, String) {
    (submission.problem.clone(), submission.student.clone())
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn find(
        &self,
        problem_id: &str,
        student_id: &str,
    ) -> Result<Option<Submission>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .get(&(problem_id.to_string(), student_id.to_string()))
            .cloned())
    }

    async fn upsert(&self, submission: &Submission) -> Result<(), StoreError> {
        self.records
            .lock()
            .await
            .insert(record_key(submission), submission.clone());
        Ok(())
    }

    async fn insert_new(&self, submission: &Submission) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let key = record_key(submission);
        if records.contains_key(&key) {
            return Err(StoreError::Duplicate);
        }
        records.insert(key, submission.clone());
        Ok(())
    }
}

/// Redis-backed store. One JSON value per (problem, student) key.
#[derive(Clone)]
pub struct RedisSubmissionStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisSubmissionStore {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }
}

fn backend(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl SubmissionStore for RedisSubmissionStore {
    async fn find(
        &self,
        problem_id: &str,
        student_id: &str,
    ) -> Result<Option<Submission>, StoreError> {
        // ConnectionManager is a cheap handle onto a shared multiplexed connection
        let mut conn = self.conn.clone();
        keys::get_submission(&mut conn, problem_id, student_id)
            .await
            .map_err(backend)
    }

    async fn upsert(&self, submission: &Submission) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        keys::put_submission(&mut conn, submission)
            .await
            .map_err(backend)
    }

    async fn insert_new(&self, submission: &Submission) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let written = keys::put_submission_if_absent(&mut conn, submission)
            .await
            .map_err(backend)?;
        if written {
            Ok(())
        } else {
            Err(StoreError::Duplicate)
        }
    }
}
