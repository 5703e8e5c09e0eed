//! Job model (§3, §4.5 step 6).
//!
//! A [`Job`] composes a task-spec DAG rooted at a commit (or try-job
//! patch) into one lifecycle. It becomes terminal when every task spec
//! in its closure has either a `Success` task or a permanently-failed
//! one (no further retry possible); its own status is the worst-of
//! among `{Failure, Mishap, Canceled}` unless every leaf succeeded.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::task::TaskStatus;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub repo: String,
    pub revision: String,
    pub name: String,
    /// Present only for try-jobs (C6): identifies the changelist patch
    /// this job was evaluated against.
    pub changelist_patch: Option<String>,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.repo, self.revision)?;
        if let Some(patch) = &self.changelist_patch {
            write!(f, " (patch {patch})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    InProgress,
    Success,
    Failure,
    Mishap,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::InProgress)
    }

    /// Combine two terminal-leaf outcomes into the "worst of" ordering
    /// used to derive overall job status (§4.5 step 6). `Canceled` is
    /// the worst, then `Mishap`, then `Failure`, then `Success`.
    fn severity(&self) -> u8 {
        match self {
            JobStatus::Success => 0,
            JobStatus::Failure => 1,
            JobStatus::Mishap => 2,
            JobStatus::Canceled => 3,
            JobStatus::InProgress => unreachable!("InProgress is not a leaf outcome"),
        }
    }
}

impl From<TaskStatus> for JobStatus {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Success => JobStatus::Success,
            TaskStatus::Failure => JobStatus::Failure,
            TaskStatus::Mishap => JobStatus::Mishap,
            TaskStatus::Pending | TaskStatus::Running => JobStatus::InProgress,
        }
    }
}

/// One attempt's worth of status as recorded against a job's task-spec
/// slot. Retries append a new summary rather than replacing the prior
/// one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_key: JobKey,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub status: JobStatus,
    /// Retries are appended, not replaced — the last entry per spec
    /// name is the most recent attempt.
    #[serde(default)]
    pub tasks: HashMap<String, Vec<TaskSummary>>,
    #[serde(default)]
    pub dependencies: HashMap<String, Vec<String>>,
    pub priority: f64,
    pub requested_at: DateTime<Utc>,
    pub is_force: bool,
    pub db_modified: DateTime<Utc>,
}

impl Job {
    pub fn new(
        job_key: JobKey,
        dependencies: HashMap<String, Vec<String>>,
        priority: f64,
        is_force: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_key,
            created: now,
            started: None,
            finished: None,
            status: JobStatus::InProgress,
            tasks: HashMap::new(),
            dependencies,
            priority,
            requested_at: now,
            is_force,
            db_modified: now,
        }
    }

    /// Append a task-summary retry entry to this job's record for
    /// `spec_name`, marking `started` on first attachment.
    pub fn attach_task(&mut self, spec_name: &str, summary: TaskSummary, now: DateTime<Utc>) {
        if self.started.is_none() {
            self.started = Some(now);
        }
        self.tasks.entry(spec_name.to_string()).or_default().push(summary);
    }

    /// The most recent task summary recorded for a given spec name.
    pub fn latest_summary(&self, spec_name: &str) -> Option<&TaskSummary> {
        self.tasks.get(spec_name).and_then(|v| v.last())
    }

    /// Refresh the status of the latest summary for `spec_name` in
    /// place, if it names `task_id` — this is how a store-side status
    /// transition (Pending → Running → terminal) on an already-attached
    /// task reaches the job's own record, as opposed to [`attach_task`]
    /// which appends a new attempt. Returns whether anything changed.
    pub fn refresh_latest_status(&mut self, spec_name: &str, task_id: Uuid, status: TaskStatus) -> bool {
        let Some(summaries) = self.tasks.get_mut(spec_name) else { return false };
        let Some(summary) = summaries.last_mut() else { return false };
        if summary.task_id != task_id || summary.status == status {
            return false;
        }
        summary.status = status;
        true
    }

    /// Re-derive `self.status`/`self.finished` from the closure of
    /// `spec_names` this job must satisfy (§4.5 step 6). A spec is a
    /// "permanent failure" when its latest summary is terminal,
    /// non-Success, and its task has exhausted retries — callers pass
    /// that verdict in via `is_permanently_failed` since it depends on
    /// `TaskSpec.max_attempts`, which the job itself doesn't carry.
    pub fn recompute_status(
        &mut self,
        spec_names: &[String],
        is_permanently_failed: impl Fn(&TaskSummary) -> bool,
        now: DateTime<Utc>,
    ) {
        if self.status.is_terminal() {
            return;
        }

        let mut worst: Option<JobStatus> = None;
        for name in spec_names {
            let Some(summary) = self.latest_summary(name) else {
                return; // no task dispatched yet for this leaf: not terminal
            };
            if !summary.status.is_terminal() {
                return; // still running
            }
            if summary.status != TaskStatus::Success && !is_permanently_failed(summary) {
                return; // could still retry
            }
            let leaf_status: JobStatus = summary.status.into();
            worst = Some(match worst {
                None => leaf_status,
                Some(current) if leaf_status.severity() > current.severity() => leaf_status,
                Some(current) => current,
            });
        }

        if let Some(status) = worst {
            self.status = status;
            self.finished = Some(now);
        }
    }

    /// Cancel the job. Pending tasks exclusive to this job should have
    /// their farm cancellation requested by the caller (scheduler); the
    /// model only records the terminal status.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Canceled;
        self.finished = Some(now);
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job({}, {}, {})", self.id, self.job_key, self.status.as_display())
    }
}

impl JobStatus {
    fn as_display(&self) -> &'static str {
        match self {
            JobStatus::InProgress => "in_progress",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Mishap => "mishap",
            JobStatus::Canceled => "canceled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> JobKey {
        JobKey {
            repo: "repo".into(),
            revision: "deadbeef".into(),
            name: "ci".into(),
            changelist_patch: None,
        }
    }

    fn summary(status: TaskStatus) -> TaskSummary {
        TaskSummary { task_id: Uuid::now_v7(), status, attempt: 1 }
    }

    #[test]
    fn job_is_success_when_every_leaf_succeeds() {
        let now = Utc::now();
        let mut job = Job::new(key(), HashMap::new(), 0.5, false, now);
        job.attach_task("build", summary(TaskStatus::Success), now);
        job.attach_task("test", summary(TaskStatus::Success), now);
        job.recompute_status(&["build".into(), "test".into()], |_| true, now);
        assert_eq!(job.status, JobStatus::Success);
        assert!(job.finished.is_some());
    }

    #[test]
    fn job_stays_in_progress_with_non_terminal_leaf() {
        let now = Utc::now();
        let mut job = Job::new(key(), HashMap::new(), 0.5, false, now);
        job.attach_task("build", summary(TaskStatus::Success), now);
        job.attach_task("test", summary(TaskStatus::Running), now);
        job.recompute_status(&["build".into(), "test".into()], |_| true, now);
        assert_eq!(job.status, JobStatus::InProgress);
    }

    #[test]
    fn job_worst_of_picks_mishap_over_failure() {
        let now = Utc::now();
        let mut job = Job::new(key(), HashMap::new(), 0.5, false, now);
        job.attach_task("a", summary(TaskStatus::Failure), now);
        job.attach_task("b", summary(TaskStatus::Mishap), now);
        job.recompute_status(&["a".into(), "b".into()], |_| true, now);
        assert_eq!(job.status, JobStatus::Mishap);
    }

    #[test]
    fn job_does_not_terminalize_while_leaf_can_still_retry() {
        let now = Utc::now();
        let mut job = Job::new(key(), HashMap::new(), 0.5, false, now);
        job.attach_task("a", summary(TaskStatus::Mishap), now);
        job.recompute_status(&["a".into()], |_| false, now);
        assert_eq!(job.status, JobStatus::InProgress);
    }

    #[test]
    fn terminal_job_is_not_recomputed() {
        let now = Utc::now();
        let mut job = Job::new(key(), HashMap::new(), 0.5, false, now);
        job.cancel(now);
        job.recompute_status(&["a".into()], |_| true, now);
        assert_eq!(job.status, JobStatus::Canceled);
    }
}
