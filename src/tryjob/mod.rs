//! Try-Job Intake (§4.6, C6): polls the review system for pending try
//! requests and converts each one into a `Job`. From the scheduler's
//! point of view the resulting job is indistinguishable from a
//! commit-triggered one — it sits at the patch's base revision and is
//! picked up by the same `find_in_progress_by_revision` scan.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::external::review::TryJobRequest;
use crate::external::{RepoHost, ReviewSystem};
use crate::guard::SingleFlightGuard as PollGuard;
use crate::model::changelist::Changelist;
use crate::model::job::{Job, JobKey};
use crate::model::task_spec::TriggerKind;
use crate::scheduler::patched_revision;
use crate::spec_eval::SpecEvaluator;
use crate::store::{ChangelistStore, JobStore};

/// Per-bucket poll configuration (§6 "`--tryjob_bucket`").
#[derive(Debug, Clone)]
pub struct TryJobConfig {
    pub repo: String,
    pub bucket: String,
}

/// Summary of one `poll` invocation, logged at `info!`.
#[derive(Debug, Clone, Default)]
pub struct TryJobReport {
    pub pending_seen: usize,
    pub jobs_created: usize,
}

pub struct TryJobIntake<R: RepoHost, V: ReviewSystem> {
    review: Arc<V>,
    spec_eval: Arc<SpecEvaluator<R>>,
    changelist_store: Arc<ChangelistStore>,
    job_store: Arc<JobStore>,
    guard: PollGuard,
}

impl<R: RepoHost, V: ReviewSystem> TryJobIntake<R, V> {
    pub fn new(
        review: Arc<V>,
        spec_eval: Arc<SpecEvaluator<R>>,
        changelist_store: Arc<ChangelistStore>,
        job_store: Arc<JobStore>,
    ) -> Self {
        Self { review, spec_eval, changelist_store, job_store, guard: PollGuard::new() }
    }

    /// One poll cycle (§4.6). Returns `Ok(None)` if another poll for
    /// this intake is already in flight (§5 "each long-running loop
    /// runs at most one iteration at a time").
    pub async fn poll(&self, cfg: &TryJobConfig, now: DateTime<Utc>) -> Result<Option<TryJobReport>> {
        let Some(_permit) = self.guard.try_enter() else {
            tracing::debug!(bucket = %cfg.bucket, "try-job poll already in flight, skipping");
            return Ok(None);
        };
        self.run_poll(cfg, now).await.map(Some)
    }

    async fn run_poll(&self, cfg: &TryJobConfig, now: DateTime<Utc>) -> Result<TryJobReport> {
        let pending = self.review.pending_tryjobs(&cfg.bucket).await?;
        let mut report = TryJobReport { pending_seen: pending.len(), ..Default::default() };

        for request in &pending {
            if self.intake_one(cfg, request, now).await? {
                report.jobs_created += 1;
            }
        }

        tracing::info!(
            bucket = %cfg.bucket,
            seen = report.pending_seen,
            created = report.jobs_created,
            "try-job poll complete"
        );
        Ok(report)
    }

    /// Resolve one pending try-request to its `Changelist`, parse
    /// `tasks.json` at the base revision with the patch applied, and
    /// create a `Job` per try-job-triggered `JobSpec` that doesn't
    /// already have one. Returns whether any job was created.
    async fn intake_one(&self, cfg: &TryJobConfig, request: &TryJobRequest, now: DateTime<Utc>) -> Result<bool> {
        let cl_id = format!("{}_{}", request.system, request.external_cl_id);
        if self.changelist_store.get(&cl_id).await?.is_none() {
            let mut cl = Changelist::new(request.system.clone(), &request.external_cl_id);
            cl.id = cl_id.clone();
            self.changelist_store.upsert(&cl).await?;
        }

        let revision = patched_revision(&request.base_revision, &request.patch);
        let graph = self.spec_eval.load(&cfg.repo, &revision).await?;

        let mut created_any = false;
        for job_spec in graph.job_specs.values() {
            if job_spec.trigger != TriggerKind::Tryjob {
                continue;
            }
            let key = JobKey {
                repo: cfg.repo.clone(),
                revision: request.base_revision.clone(),
                name: job_spec.name.clone(),
                changelist_patch: Some(cl_id.clone()),
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
            created_any = true;
        }
        Ok(created_any)
    }
}
