//! Scheduler Core (§4.5, C5): the periodic tick that turns in-progress
//! Jobs into scored, dispatched Tasks and reconciles job status.
//!
//! [`update`] handles the other half of the loop — advancing tasks from
//! farm pub/sub notifications — as a sibling module, the same split
//! `indexer` uses between commit indexing and landing reconciliation.

pub mod scoring;
pub mod update;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::blacklist::Blacklist;
use crate::errors::Result;
use crate::external::{FarmApi, RepoHost, TriggerTaskRequest};
use crate::guard::SingleFlightGuard as TickGuard;
use crate::model::job::{Job, JobKey, TaskSummary};
use crate::model::task::{Task, TaskKey, TaskStatus};
use crate::model::task_spec::{TaskSpec, TriggerKind};
use crate::scheduler::scoring::{rank, Candidate};
use crate::spec_eval::SpecEvaluator;
use crate::store::{CommitStore, JobStore, TaskStore};

/// Scheduler flags (§6 "Scheduler flags"). Fields unrelated to
/// `tick()` itself (`--pool`, `--swarming_server`, `--tryjob_bucket`)
/// live with the components that consume them (dispatch dimensions
/// come from the `TaskSpec`; try-job bucket belongs to C6).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub repos: Vec<String>,
    pub time_period: StdDuration,
    pub commit_window: usize,
    pub score_decay_24h: f64,
    /// Farm admission limit for this tick (§4.5 step 4 "up to farm
    /// admission limits").
    pub max_dispatch_per_tick: usize,
    pub pubsub_topic: String,
}

/// Summary of one `tick` invocation, logged at `info!`.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub candidates_considered: usize,
    pub tasks_dispatched: usize,
    pub jobs_terminalized: usize,
}

/// What a ranked [`Candidate`] actually dispatches: the `TaskSpec` it
/// came from, which jobs are waiting on it, and (if this is a retry)
/// the task it supersedes.
struct DispatchPlan {
    key: TaskKey,
    spec: TaskSpec,
    jobs: Vec<Uuid>,
    retry_of: Option<Task>,
}

pub struct Scheduler<R: RepoHost, F: FarmApi> {
    spec_eval: Arc<SpecEvaluator<R>>,
    commit_store: Arc<CommitStore>,
    job_store: Arc<JobStore>,
    task_store: Arc<TaskStore>,
    blacklist: Arc<Blacklist>,
    farm: Arc<F>,
    guard: TickGuard,
}

impl<R: RepoHost, F: FarmApi> Scheduler<R, F> {
    pub fn new(
        spec_eval: Arc<SpecEvaluator<R>>,
        commit_store: Arc<CommitStore>,
        job_store: Arc<JobStore>,
        task_store: Arc<TaskStore>,
        blacklist: Arc<Blacklist>,
        farm: Arc<F>,
    ) -> Self {
        Self { spec_eval, commit_store, job_store, task_store, blacklist, farm, guard: TickGuard::new() }
    }

    /// One scheduling tick (§4.5). Returns `Ok(None)` if another tick
    /// is already in flight — dropped, not queued, per §9 "Periodic
    /// tick vs. pub/sub trigger".
    pub async fn tick(&self, cfg: &SchedulerConfig, now: DateTime<Utc>) -> Result<Option<TickReport>> {
        let Some(_permit) = self.guard.try_enter() else {
            tracing::debug!("scheduler tick already in flight, skipping");
            return Ok(None);
        };
        self.run_tick(cfg, now).await.map(Some)
    }

    async fn run_tick(&self, cfg: &SchedulerConfig, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();

        for repo in &cfg.repos {
            let window = self.commit_window(repo, cfg, now).await?;
            let mut candidates = Vec::new();
            let mut plans: HashMap<TaskKey, DispatchPlan> = HashMap::new();
            let mut touched_jobs: Vec<Uuid> = Vec::new();

            for commit in &window {
                // All jobs at this revision share one `tasks.json`.
                let graph = self.spec_eval.load(repo, &commit.git_hash).await?;
                self.ensure_commit_jobs(repo, commit, &graph, now).await?;

                let jobs = self.job_store.find_in_progress_by_revision(repo, &commit.git_hash).await?;
                if jobs.is_empty() {
                    continue;
                }

                let mut per_key_jobs: HashMap<TaskKey, Vec<Uuid>> = HashMap::new();
                let mut per_key_spec: HashMap<TaskKey, TaskSpec> = HashMap::new();
                let mut per_key_graph: HashMap<TaskKey, Arc<crate::model::task_spec::TaskSpecGraph>> = HashMap::new();
                let mut is_force_key: HashMap<TaskKey, bool> = HashMap::new();

                for job in &jobs {
                    // A try-job's closure was expanded against the
                    // patched revision at intake time (§4.6); re-expand
                    // against the same virtual revision here rather
                    // than the bare commit graph.
                    let job_graph = match &job.job_key.changelist_patch {
                        Some(patch) => self.spec_eval.load(repo, &patched_revision(&commit.git_hash, patch)).await?,
                        None => graph.clone(),
                    };
                    let (closure, _edges) = job_graph.expand(&job.job_key.name)?;
                    for name in &closure {
                        let Some(spec) = job_graph.task_specs.get(name) else { continue };
                        let forced_job_id = if job.is_force { Some(job.id) } else { None };
                        let key = TaskKey {
                            repo: repo.clone(),
                            revision: commit.git_hash.clone(),
                            name: name.clone(),
                            forced_job_id,
                        };
                        per_key_jobs.entry(key.clone()).or_default().push(job.id);
                        per_key_spec.entry(key.clone()).or_insert_with(|| spec.clone());
                        per_key_graph.entry(key.clone()).or_insert_with(|| job_graph.clone());
                        is_force_key.insert(key, job.is_force);
                    }
                }

                for (key, job_ids) in per_key_jobs {
                    let spec = per_key_spec.get(&key).expect("spec recorded alongside key").clone();
                    let key_graph = per_key_graph.get(&key).expect("graph recorded alongside key").clone();
                    let is_force = is_force_key.get(&key).copied().unwrap_or(false);

                    let outcome = self
                        .evaluate_candidate(repo, &commit.git_hash, &key, &spec, &key_graph)
                        .await?;

                    match outcome {
                        CandidateOutcome::AlreadySatisfied(success_task) => {
                            for job_id in job_ids {
                                if self.attach_if_missing(job_id, &key.name, &success_task, now).await? {
                                    touched_jobs.push(job_id);
                                }
                            }
                        }
                        CandidateOutcome::Blocked => {}
                        CandidateOutcome::Ready { attempt, retry_of } => {
                            candidates.push(Candidate {
                                repo: repo.clone(),
                                revision: commit.git_hash.clone(),
                                commit_id: commit.commit_id.as_str().to_string(),
                                task_spec_name: key.name.clone(),
                                priority: spec.priority,
                                commit_time: commit.commit_time,
                                attempt,
                                is_force,
                                forced_job_id: key.forced_job_id,
                            });
                            plans.insert(key.clone(), DispatchPlan { key, spec, jobs: job_ids, retry_of });
                        }
                    }
                }
            }

            report.candidates_considered += candidates.len();
            rank(&mut candidates, now, cfg.score_decay_24h);

            for candidate in candidates.into_iter().take(cfg.max_dispatch_per_tick) {
                let key = TaskKey {
                    repo: candidate.repo,
                    revision: candidate.revision,
                    name: candidate.task_spec_name,
                    forced_job_id: candidate.forced_job_id,
                };
                let Some(plan) = plans.remove(&key) else { continue };
                let dispatched = self.dispatch(&plan, cfg, now).await?;
                report.tasks_dispatched += 1;
                for job_id in &plan.jobs {
                    if self.attach_if_missing(*job_id, &plan.key.name, &dispatched, now).await? {
                        touched_jobs.push(*job_id);
                    }
                }
            }

            touched_jobs.sort();
            touched_jobs.dedup();
            for job_id in touched_jobs {
                if self.recompute_job(repo, job_id, now).await? {
                    report.jobs_terminalized += 1;
                }
            }
        }

        tracing::info!(
            candidates = report.candidates_considered,
            dispatched = report.tasks_dispatched,
            terminalized = report.jobs_terminalized,
            "scheduler tick complete"
        );
        Ok(report)
    }

    /// Widen `[now - time_period, now]` backwards until it covers at
    /// least `commit_window` commits for `repo`, or two widenings in a
    /// row stop adding any (§4.5 step 1).
    async fn commit_window(&self, repo: &str, cfg: &SchedulerConfig, now: DateTime<Utc>) -> Result<Vec<crate::model::commit::Commit>> {
        let period = Duration::from_std(cfg.time_period).unwrap_or(Duration::minutes(1));
        let mut since = now - period;
        let mut commits = self.commit_store.commits_since(repo, since).await?;
        let mut previous_len = commits.len();
        while commits.len() < cfg.commit_window {
            since -= period;
            commits = self.commit_store.commits_since(repo, since).await?;
            if commits.len() == previous_len {
                break;
            }
            previous_len = commits.len();
        }
        Ok(commits)
    }

    /// Materialize a `Job` for every commit-triggered `JobSpec` at this
    /// revision that doesn't have one yet (§3 "Jobs: created from
    /// commits (C5)"). Idempotent: a second tick over the same commit
    /// finds the existing row via `JobKey` and does nothing.
    async fn ensure_commit_jobs(
        &self,
        repo: &str,
        commit: &crate::model::commit::Commit,
        graph: &crate::model::task_spec::TaskSpecGraph,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for job_spec in graph.job_specs.values() {
            if job_spec.trigger != TriggerKind::Commit {
                continue;
            }
            let key = JobKey {
                repo: repo.to_string(),
                revision: commit.git_hash.clone(),
                name: job_spec.name.clone(),
                changelist_patch: None,
            };
            if self.job_store.find_by_key(&key).await?.is_some() {
                continue;
            }
            let (_, edges) = graph.expand(&job_spec.name)?;
            let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
            for (name, dep) in edges {
                dependencies.entry(name).or_default().push(dep);
            }
            let job = Job::new(key, dependencies, job_spec.priority, false, now);
            self.job_store.insert(&job).await?;
        }
        Ok(())
    }

    async fn evaluate_candidate(
        &self,
        repo: &str,
        revision: &str,
        key: &TaskKey,
        spec: &TaskSpec,
        graph: &crate::model::task_spec::TaskSpecGraph,
    ) -> Result<CandidateOutcome> {
        if !self.task_store.find_active_by_key(key).await?.is_empty() {
            return Ok(CandidateOutcome::Blocked);
        }

        let attempts = self.task_store.find_all_by_key(key).await?;
        if let Some(success) = attempts.iter().find(|t| t.status == TaskStatus::Success) {
            return Ok(CandidateOutcome::AlreadySatisfied(success.clone()));
        }

        let (blacklisted, _reason) = self.blacklist.is_blacklisted(revision, &key.name).await?;
        if blacklisted {
            return Ok(CandidateOutcome::Blocked);
        }

        if !self.parents_satisfied(repo, revision, key.forced_job_id, spec, graph).await? {
            return Ok(CandidateOutcome::Blocked);
        }

        match attempts.first() {
            None => Ok(CandidateOutcome::Ready { attempt: 1, retry_of: None }),
            Some(last) if last.should_retry() => {
                Ok(CandidateOutcome::Ready { attempt: last.attempt + 1, retry_of: Some(last.clone()) })
            }
            Some(_) => Ok(CandidateOutcome::Blocked), // exhausted maxAttempts, permanently failed
        }
    }

    /// §4.5 step 2 "Parent satisfaction": every `dependencies` parent
    /// needs a Success task; every `optional_dependencies` parent only
    /// needs to have reached any terminal state.
    async fn parents_satisfied(
        &self,
        repo: &str,
        revision: &str,
        forced_job_id: Option<Uuid>,
        spec: &TaskSpec,
        graph: &crate::model::task_spec::TaskSpecGraph,
    ) -> Result<bool> {
        for dep in &spec.dependencies {
            if !graph.task_specs.contains_key(dep) {
                continue;
            }
            let key = TaskKey { repo: repo.to_string(), revision: revision.to_string(), name: dep.clone(), forced_job_id };
            let attempts = self.task_store.find_all_by_key(&key).await?;
            if !attempts.iter().any(|t| t.status == TaskStatus::Success) {
                return Ok(false);
            }
        }
        for dep in &spec.optional_dependencies {
            if !graph.task_specs.contains_key(dep) {
                continue;
            }
            let key = TaskKey { repo: repo.to_string(), revision: revision.to_string(), name: dep.clone(), forced_job_id };
            let attempts = self.task_store.find_all_by_key(&key).await?;
            if !attempts.iter().any(|t| t.status.is_terminal()) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn dispatch(&self, plan: &DispatchPlan, cfg: &SchedulerConfig, now: DateTime<Utc>) -> Result<Task> {
        let mut task = match &plan.retry_of {
            Some(prior) => prior.retry(now),
            None => Task::new_pending(plan.key.clone(), plan.spec.max_attempts, now),
        };

        let req = TriggerTaskRequest {
            name: &plan.spec.name,
            cmd: &plan.spec.cmd,
            dimensions: &plan.spec.dimensions,
            priority: plan.spec.priority,
            expiration: plan.spec.expiration,
            execution_timeout: plan.spec.execution_timeout,
            pubsub_topic: &cfg.pubsub_topic,
        };
        let farm_task_id = self.farm.trigger_task(req).await?;
        task.farm_task_id = Some(farm_task_id);
        task.jobs = plan.jobs.iter().copied().collect();

        self.task_store.insert(&task).await?;
        Ok(task)
    }

    /// Attach `task` to `job_id`'s record for `spec_name`: a new
    /// attempt is appended, a status change on the already-attached
    /// attempt is refreshed in place, and an unchanged attempt is a
    /// no-op. Returns whether the job was touched (and so needs
    /// `recompute_status`).
    async fn attach_if_missing(&self, job_id: Uuid, spec_name: &str, task: &Task, now: DateTime<Utc>) -> Result<bool> {
        let job = self.job_store.get(job_id).await?;
        let already_latest = job.latest_summary(spec_name).map(|s| s.task_id) == Some(task.id);

        let snapshot = job.db_modified;
        let mut updated = job;
        let touched = if already_latest {
            updated.refresh_latest_status(spec_name, task.id, task.status)
        } else {
            updated.attach_task(spec_name, TaskSummary { task_id: task.id, status: task.status, attempt: task.attempt }, now);
            true
        };
        if touched {
            self.job_store.update(&updated, snapshot, now).await?;
        }
        Ok(touched)
    }

    /// Re-derive one job's status from its current closure (§4.5 step
    /// 6). Returns whether this call terminalized it.
    async fn recompute_job(&self, repo: &str, job_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let job = self.job_store.get(job_id).await?;
        if job.status.is_terminal() {
            return Ok(false);
        }
        let graph = self.spec_eval.load(repo, &job.job_key.revision).await?;
        let (closure, _edges) = graph.expand(&job.job_key.name)?;
        let names: Vec<String> = closure.into_iter().collect();

        let mut permanently_failed: HashMap<Uuid, bool> = HashMap::new();
        for name in &names {
            if let Some(summary) = job.latest_summary(name) {
                let max_attempts = graph.task_specs.get(name).map(|s| s.max_attempts).unwrap_or(u32::MAX);
                let failed = summary.status != TaskStatus::Success
                    && summary.status.is_terminal()
                    && summary.attempt >= max_attempts;
                permanently_failed.insert(summary.task_id, failed);
            }
        }

        let snapshot = job.db_modified;
        let mut updated = job;
        updated.recompute_status(&names, |s| *permanently_failed.get(&s.task_id).unwrap_or(&false), now);
        if !updated.status.is_terminal() {
            return Ok(false);
        }
        self.job_store.update(&updated, snapshot, now).await?;
        Ok(true)
    }
}

enum CandidateOutcome {
    /// A Success task already covers this key; reuse it (§4.5 step 7).
    AlreadySatisfied(Task),
    Blocked,
    Ready { attempt: u32, retry_of: Option<Task> },
}

/// The virtual revision key a try-job's patched `tasks.json` is cached
/// under in the spec evaluator (§4.6): distinct from the bare commit
/// so a landed commit and an open patch against it never collide in
/// the cache. Shared with [`crate::tryjob`], which populates the same
/// key at intake time.
pub fn patched_revision(base_revision: &str, patch: &str) -> String {
    format!("{base_revision}+{patch}")
}
