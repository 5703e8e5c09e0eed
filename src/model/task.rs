//! Task model (§3, §4.5).
//!
//! A [`Task`] is a concrete execution attempt of a [`TaskSpec`](super::task_spec::TaskSpec)
//! at a specific `(repo, revision)`. Tasks are append-update: once
//! `status` reaches a terminal value the row is never mutated again
//! except to attach it to additional jobs — a retry always creates a
//! *new* Task row linked via `retry_of`.
//!
//! # Status transitions
//!
//! ```text
//! Pending ──▶ Running ──▶ Success
//!                │
//!                ├──▶ Failure
//!                └──▶ Mishap
//! ```
//!
//! Concurrency is pessimistic-by-exception: every write compares the
//! caller's `db_modified` snapshot against the stored row (see
//! [`crate::store::task_store`]) and fails with
//! `SchedulerError::ConcurrentUpdate` on mismatch.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The natural key scheduling de-duplication is keyed on (§3 invariant:
/// no two tasks with the same `TaskKey` are simultaneously
/// `Pending`/`Running`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub repo: String,
    pub revision: String,
    pub name: String,
    /// Set when this task was dispatched for one specific forced job
    /// rather than shared across every in-progress job touching the
    /// revision.
    pub forced_job_id: Option<Uuid>,
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.repo, self.revision)?;
        if let Some(job) = self.forced_job_id {
            write!(f, " (forced by {job})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failure,
    /// Farm-side infrastructure failure, distinguished from the task's
    /// own failure; eligible for automatic retry.
    Mishap,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failure | TaskStatus::Mishap
        )
    }

    /// Terminal outcomes the scheduler treats as automatically
    /// retryable (§4.5 step 5).
    pub fn is_auto_retryable(&self) -> bool {
        matches!(self, TaskStatus::Mishap | TaskStatus::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failure => "failure",
            TaskStatus::Mishap => "mishap",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A concrete execution attempt of a task spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_key: TaskKey,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub retry_of: Option<Uuid>,
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub parent_task_ids: Vec<Uuid>,
    #[serde(default)]
    pub farm_task_id: Option<String>,
    /// Content-addressed digest of the task's isolated output. The CAS
    /// client that resolves this digest to bytes is an external
    /// collaborator, out of scope here (§1 Non-goals).
    #[serde(default)]
    pub isolated_output: Option<String>,
    #[serde(default)]
    pub jobs: HashSet<Uuid>,
    pub db_modified: DateTime<Utc>,
}

impl Task {
    /// Create a new Pending task, freshly dispatched (§4.5 step 4:
    /// `created = started = now`, `finished` unset).
    pub fn new_pending(task_key: TaskKey, max_attempts: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            task_key,
            created: now,
            started: Some(now),
            finished: None,
            status: TaskStatus::Pending,
            retry_of: None,
            attempt: 1,
            max_attempts,
            parent_task_ids: Vec::new(),
            farm_task_id: None,
            isolated_output: None,
            jobs: HashSet::new(),
            db_modified: now,
        }
    }

    /// Build a retry task following a Mishap/Failure outcome. The
    /// caller is responsible for checking `attempt < max_attempts`
    /// first (§4.5 step 5).
    pub fn retry(&self, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            task_key: self.task_key.clone(),
            created: now,
            started: Some(now),
            finished: None,
            status: TaskStatus::Pending,
            retry_of: Some(self.id),
            attempt: self.attempt + 1,
            max_attempts: self.max_attempts,
            parent_task_ids: self.parent_task_ids.clone(),
            farm_task_id: None,
            isolated_output: None,
            jobs: self.jobs.clone(),
            db_modified: now,
        }
    }

    /// True when a retry is both warranted (auto-retryable terminal
    /// status) and still permitted by `max_attempts`.
    pub fn should_retry(&self) -> bool {
        self.status.is_auto_retryable() && self.attempt < self.max_attempts
    }

    /// Transition to a terminal status, setting `finished` once and
    /// for all. No-op guard: callers should not call this on an
    /// already-terminal task (the store layer enforces this via
    /// `db_modified`).
    pub fn finish(&mut self, status: TaskStatus, farm_task_id: Option<String>, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal(), "finish() requires a terminal status");
        self.status = status;
        self.finished = Some(now);
        if farm_task_id.is_some() {
            self.farm_task_id = farm_task_id;
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({}, {}, attempt {})", self.id, self.task_key, self.attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TaskKey {
        TaskKey {
            repo: "repo".into(),
            revision: "deadbeef".into(),
            name: "build".into(),
            forced_job_id: None,
        }
    }

    #[test]
    fn new_pending_has_started_equal_created_and_no_finish() {
        let now = Utc::now();
        let t = Task::new_pending(key(), 3, now);
        assert_eq!(t.created, now);
        assert_eq!(t.started, Some(now));
        assert!(t.finished.is_none());
        assert_eq!(t.attempt, 1);
    }

    #[test]
    fn retry_increments_attempt_and_links_retry_of() {
        let now = Utc::now();
        let t = Task::new_pending(key(), 3, now);
        let retried = t.retry(now);
        assert_eq!(retried.attempt, 2);
        assert_eq!(retried.retry_of, Some(t.id));
        assert_eq!(retried.task_key, t.task_key);
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let now = Utc::now();
        let mut t = Task::new_pending(key(), 1, now);
        t.finish(TaskStatus::Mishap, None, now);
        assert!(!t.should_retry(), "max_attempts == 1 must not retry");

        let mut t2 = Task::new_pending(key(), 2, now);
        t2.finish(TaskStatus::Mishap, None, now);
        assert!(t2.should_retry());
    }

    #[test]
    fn success_is_not_auto_retryable() {
        let now = Utc::now();
        let mut t = Task::new_pending(key(), 5, now);
        t.finish(TaskStatus::Success, None, now);
        assert!(!t.should_retry());
    }
}
