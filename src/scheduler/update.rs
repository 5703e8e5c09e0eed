//! Farm pub/sub result ingestion (§4.5 step 5): advances tasks
//! `Pending → Running → terminal`, refreshes the owning jobs' summaries,
//! and synthesizes retry tasks for auto-retryable terminal outcomes.
//!
//! Runs independently of [`super::Scheduler::tick`] — the farm publishes
//! one message per status transition, and processing them promptly
//! (rather than waiting for the next tick) is what makes a dispatched
//! task's lifecycle visible to modification-stream subscribers in
//! near-real-time.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{Result, SchedulerError};
use crate::external::farm::FarmOutcome;
use crate::external::{FarmApi, PubSubMessage, RepoHost, Subscription};
use crate::model::job::TaskSummary;
use crate::model::task::{Task, TaskStatus};
use crate::scheduler::{Scheduler, SchedulerConfig};

/// One farm status-transition notification, decoded from a
/// [`PubSubMessage`]. Attribute keys mirror §6 ("message attributes
/// contain at minimum `swarming_task_id`..."); we additionally require
/// our own `task_id` attribute (the UUID primary key) so a transition
/// resolves to a row with a single indexed lookup rather than a scan
/// keyed on the farm's opaque id.
#[derive(Debug, Clone)]
struct FarmEvent {
    task_id: Uuid,
    outcome: FarmOutcome,
    farm_task_id: String,
    isolated_output: Option<String>,
}

fn decode(msg: &PubSubMessage) -> Result<FarmEvent> {
    let task_id_attr = msg
        .attributes
        .get("task_id")
        .ok_or_else(|| SchedulerError::InvalidSpec("farm event missing task_id attribute".into()))?;
    let task_id = Uuid::parse_str(task_id_attr)
        .map_err(|e| SchedulerError::InvalidSpec(format!("farm event task_id is not a uuid: {e}")))?;
    let farm_task_id = msg
        .attributes
        .get("swarming_task_id")
        .cloned()
        .ok_or_else(|| SchedulerError::InvalidSpec("farm event missing swarming_task_id attribute".into()))?;

    let result: crate::external::farm::FarmTaskResult = serde_json::from_slice(&msg.data)?;
    Ok(FarmEvent { task_id, outcome: result.outcome, farm_task_id, isolated_output: result.isolated_output })
}

impl TaskStatus {
    fn from_farm_outcome(outcome: FarmOutcome) -> Option<TaskStatus> {
        match outcome {
            FarmOutcome::Success => Some(TaskStatus::Success),
            FarmOutcome::Failure => Some(TaskStatus::Failure),
            FarmOutcome::Mishap => Some(TaskStatus::Mishap),
            FarmOutcome::Pending | FarmOutcome::Running => None,
        }
    }
}

impl<R: RepoHost, F: FarmApi> Scheduler<R, F> {
    /// Pull and apply up to `max` pending farm notifications. Returns
    /// the number applied; malformed messages are Acked (permanent,
    /// not worth redelivering) and logged rather than blocking the
    /// whole batch.
    pub async fn apply_farm_events<S: Subscription>(
        &self,
        subscription: &S,
        max: usize,
        cfg: &SchedulerConfig,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let messages = subscription.pull(max).await?;
        let mut applied = 0;
        for message in messages {
            match self.apply_one(&message, cfg, now).await {
                Ok(()) => {
                    subscription.ack(&message.id).await?;
                    applied += 1;
                }
                Err(err) if err.is_retryable() => {
                    tracing::warn!(message_id = %message.id, error = %err, "farm event nacked for redelivery");
                    subscription.nack(&message.id).await?;
                }
                Err(err) => {
                    tracing::error!(message_id = %message.id, error = %err, "farm event permanently failed, acking");
                    subscription.ack(&message.id).await?;
                }
            }
        }
        Ok(applied)
    }

    async fn apply_one(&self, message: &PubSubMessage, cfg: &SchedulerConfig, now: DateTime<Utc>) -> Result<()> {
        let event = decode(message)?;
        let task = self.task_store.get(event.task_id).await?;

        let Some(status) = TaskStatus::from_farm_outcome(event.outcome) else {
            return Ok(()); // Pending/Running: no state change worth persisting.
        };
        if task.status.is_terminal() {
            return Ok(()); // redelivery of an already-applied terminal transition
        }

        let snapshot = task.db_modified;
        let mut updated = task.clone();
        updated.finish(status, Some(event.farm_task_id.clone()), now);
        updated.isolated_output = event.isolated_output.clone();
        let updated = self.task_store.update(&updated, snapshot, now).await?;

        self.refresh_job_summaries(&updated, now).await?;

        if updated.should_retry() {
            self.spawn_retry(&updated, cfg, now).await?;
        }
        Ok(())
    }

    /// Push `task`'s new status into every job that lists it, using
    /// the spec name recovered from the task's own key.
    async fn refresh_job_summaries(&self, task: &Task, now: DateTime<Utc>) -> Result<()> {
        for job_id in &task.jobs {
            let job = self.job_store.get(*job_id).await?;
            let snapshot = job.db_modified;
            let mut updated = job;
            if !updated.refresh_latest_status(&task.task_key.name, task.id, task.status) {
                continue;
            }
            self.job_store.update(&updated, snapshot, now).await?;
        }
        Ok(())
    }

    /// §4.5 step 5: on an auto-retryable terminal outcome with budget
    /// remaining, synthesize and dispatch the next attempt immediately
    /// rather than waiting for the next tick to notice the gap.
    async fn spawn_retry(&self, failed: &Task, cfg: &SchedulerConfig, now: DateTime<Utc>) -> Result<()> {
        let mut retry = failed.retry(now);

        // The spec (cmd/dimensions/timeouts) lives with the TaskSpec,
        // not the Task row; re-resolve it so the retry's farm request
        // matches what the original dispatch used.
        let graph = self.spec_eval.load(&retry.task_key.repo, &retry.task_key.revision).await?;
        let Some(spec) = graph.task_specs.get(&retry.task_key.name) else {
            return Err(SchedulerError::NotFound(format!(
                "task spec {} vanished from tasks.json between attempts",
                retry.task_key.name
            )));
        };
        let req = crate::external::TriggerTaskRequest {
            name: &spec.name,
            cmd: &spec.cmd,
            dimensions: &spec.dimensions,
            priority: spec.priority,
            expiration: spec.expiration,
            execution_timeout: spec.execution_timeout,
            pubsub_topic: &cfg.pubsub_topic,
        };
        let farm_task_id = self.farm.trigger_task(req).await?;
        retry.farm_task_id = Some(farm_task_id);
        self.task_store.insert(&retry).await?;

        for job_id in &retry.jobs {
            let job = self.job_store.get(*job_id).await?;
            let snapshot = job.db_modified;
            let mut updated = job;
            updated.attach_task(
                &retry.task_key.name,
                TaskSummary { task_id: retry.id, status: retry.status, attempt: retry.attempt },
                now,
            );
            self.job_store.update(&updated, snapshot, now).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as Map;
    use std::sync::Arc;

    use async_trait::async_trait;
    use sea_orm::{ConnectionTrait, Database, Schema};

    use super::*;
    use crate::blacklist::Blacklist;
    use crate::external::farm::FarmTaskResult;
    use crate::external::repo_host::{CommitRef, LongCommit};
    use crate::external::{InMemoryPubSub, TriggerTaskRequest};
    use crate::model::job::{Job, JobKey};
    use crate::scheduler::Scheduler;
    use crate::spec_eval::SpecEvaluator;
    use crate::store::entities::{job as job_entity, task as task_entity};
    use crate::store::{CommitStore, JobStore, TaskStore};

    struct FakeRepoHost;

    #[async_trait]
    impl RepoHost for FakeRepoHost {
        async fn log(&self, _repo: &str, _branch: &str, _limit: usize) -> Result<Vec<CommitRef>> {
            Ok(Vec::new())
        }
        async fn log_first_parent(&self, _repo: &str, _from: &str, _to: &str) -> Result<Vec<LongCommit>> {
            Ok(Vec::new())
        }
        async fn get_file(&self, _repo: &str, _path: &str, _revision: &str) -> Result<Vec<u8>> {
            Ok(br#"{"task_specs":[{"name":"build","cmd":["make"],"priority":0.5,"max_attempts":2,"execution_timeout":60,"expiration":300}],"job_specs":[{"name":"ci","task_specs":["build"],"priority":0.8,"trigger":"commit"}]}"#.to_vec())
        }
    }

    struct FakeFarmApi {
        triggered: std::sync::Mutex<usize>,
    }

    #[async_trait]
    impl FarmApi for FakeFarmApi {
        async fn trigger_task(&self, _req: TriggerTaskRequest<'_>) -> Result<String> {
            let mut n = self.triggered.lock().unwrap();
            *n += 1;
            Ok(format!("farm-{n}"))
        }
        async fn cancel_task(&self, _farm_task_id: &str) -> Result<()> {
            Ok(())
        }
        async fn get_task(&self, _farm_task_id: &str, _with_performance_stats: bool) -> Result<FarmTaskResult> {
            unimplemented!()
        }
    }

    async fn harness() -> (Scheduler<FakeRepoHost, FakeFarmApi>, Arc<JobStore>, Arc<TaskStore>, Arc<FakeFarmApi>) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let builder = db.get_database_backend();
        let schema = Schema::new(builder);
        for stmt in [
            builder.build(&schema.create_table_from_entity(job_entity::Entity)),
            builder.build(&schema.create_table_from_entity(task_entity::Entity)),
        ] {
            db.execute(stmt).await.unwrap();
        }
        let commit_store = Arc::new(CommitStore::new(db.clone()));
        let job_store = Arc::new(JobStore::new(db.clone()));
        let task_store = Arc::new(TaskStore::new(db));
        let spec_eval = Arc::new(SpecEvaluator::new(Arc::new(FakeRepoHost)));
        let blacklist = Arc::new(Blacklist::new());
        let farm = Arc::new(FakeFarmApi { triggered: std::sync::Mutex::new(0) });
        let scheduler = Scheduler::new(spec_eval, commit_store, job_store.clone(), task_store.clone(), blacklist, farm.clone());
        (scheduler, job_store, task_store, farm)
    }

    fn farm_message(task_id: Uuid, outcome: FarmOutcome) -> PubSubMessage {
        let mut attributes = Map::new();
        attributes.insert("task_id".to_string(), task_id.to_string());
        attributes.insert("swarming_task_id".to_string(), "swarm-1".to_string());
        let result = FarmTaskResult { farm_task_id: "swarm-1".into(), outcome, isolated_output: Some("digest-1".into()) };
        PubSubMessage { id: "msg-1".into(), attributes, data: serde_json::to_vec(&result).unwrap() }
    }

    fn cfg() -> SchedulerConfig {
        SchedulerConfig {
            repos: vec!["repo".into()],
            time_period: std::time::Duration::from_secs(3600),
            commit_window: 1,
            score_decay_24h: 0.5,
            max_dispatch_per_tick: 10,
            pubsub_topic: "farm-results".into(),
        }
    }

    #[tokio::test]
    async fn success_event_terminalizes_task_and_refreshes_job_summary() {
        let (scheduler, job_store, task_store, _farm) = harness().await;
        let now = Utc::now();
        let job = Job::new(
            JobKey { repo: "repo".into(), revision: "deadbeef".into(), name: "ci".into(), changelist_patch: None },
            Map::new(),
            0.8,
            false,
            now,
        );
        job_store.insert(&job).await.unwrap();

        let key = crate::model::task::TaskKey { repo: "repo".into(), revision: "deadbeef".into(), name: "build".into(), forced_job_id: None };
        let mut task = Task::new_pending(key, 2, now);
        task.jobs.insert(job.id);
        task_store.insert(&task).await.unwrap();

        let mut job = job_store.get(job.id).await.unwrap();
        let snapshot = job.db_modified;
        job.attach_task("build", TaskSummary { task_id: task.id, status: TaskStatus::Pending, attempt: 1 }, now);
        job_store.update(&job, snapshot, now).await.unwrap();

        let pubsub = InMemoryPubSub::new();
        pubsub.publish(farm_message(task.id, FarmOutcome::Success)).await;

        let applied = scheduler.apply_farm_events(&pubsub, 10, &cfg(), now).await.unwrap();
        assert_eq!(applied, 1);

        let updated_task = task_store.get(task.id).await.unwrap();
        assert_eq!(updated_task.status, TaskStatus::Success);
        assert_eq!(updated_task.isolated_output.as_deref(), Some("digest-1"));

        let updated_job = job_store.get(job.id).await.unwrap();
        assert_eq!(updated_job.latest_summary("build").unwrap().status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn mishap_with_attempts_remaining_spawns_a_retry() {
        let (scheduler, job_store, task_store, farm) = harness().await;
        let now = Utc::now();
        let job = Job::new(
            JobKey { repo: "repo".into(), revision: "deadbeef".into(), name: "ci".into(), changelist_patch: None },
            Map::new(),
            0.8,
            false,
            now,
        );
        job_store.insert(&job).await.unwrap();

        let key = crate::model::task::TaskKey { repo: "repo".into(), revision: "deadbeef".into(), name: "build".into(), forced_job_id: None };
        let mut task = Task::new_pending(key, 2, now);
        task.jobs.insert(job.id);
        task_store.insert(&task).await.unwrap();

        let pubsub = InMemoryPubSub::new();
        pubsub.publish(farm_message(task.id, FarmOutcome::Mishap)).await;

        scheduler.apply_farm_events(&pubsub, 10, &cfg(), now).await.unwrap();

        assert_eq!(*farm.triggered.lock().unwrap(), 1, "retry must hit the farm once");
        let key = crate::model::task::TaskKey { repo: "repo".into(), revision: "deadbeef".into(), name: "build".into(), forced_job_id: None };
        let attempts = task_store.find_all_by_key(&key).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().any(|t| t.retry_of == Some(task.id) && t.attempt == 2));
    }

    #[tokio::test]
    async fn redelivered_terminal_event_is_a_no_op() {
        let (scheduler, job_store, task_store, farm) = harness().await;
        let now = Utc::now();
        let job = Job::new(
            JobKey { repo: "repo".into(), revision: "deadbeef".into(), name: "ci".into(), changelist_patch: None },
            Map::new(),
            0.8,
            false,
            now,
        );
        job_store.insert(&job).await.unwrap();

        let key = crate::model::task::TaskKey { repo: "repo".into(), revision: "deadbeef".into(), name: "build".into(), forced_job_id: None };
        let mut task = Task::new_pending(key, 1, now);
        task.jobs.insert(job.id);
        task_store.insert(&task).await.unwrap();

        let pubsub = InMemoryPubSub::new();
        pubsub.publish(farm_message(task.id, FarmOutcome::Success)).await;
        scheduler.apply_farm_events(&pubsub, 10, &cfg(), now).await.unwrap();

        pubsub.publish(farm_message(task.id, FarmOutcome::Success)).await;
        scheduler.apply_farm_events(&pubsub, 10, &cfg(), now).await.unwrap();

        assert_eq!(*farm.triggered.lock().unwrap(), 0, "a Success outcome must never trigger a retry dispatch");
    }
}
