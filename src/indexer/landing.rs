//! Changelist-landing reconciliation (§4.1): a sibling cycle to
//! [`super::CommitIndexer`] that walks the same first-parent range and,
//! for each commit, extracts the changelist that landed as that
//! commit, marks it `Landed`, and promotes its changelist-scoped
//! expectations to the primary branch.

use std::sync::Arc;

use regex::Regex;
use uuid::Uuid;

use crate::errors::{Result, SchedulerError};
use crate::external::repo_host::LongCommit;
use crate::external::RepoHost;
use crate::guard::SingleFlightGuard as CycleGuard;
use crate::model::changelist::Changelist;
use crate::store::{ChangelistStore, CommitStore, ExpectationStore};

/// Extraction technique selected by configuration (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    /// Match the last occurrence of `^Reviewed-on:.*/(\d+)\s*$` in the
    /// commit body.
    ReviewedLine,
    /// Match `\(#(\d+)\)\s*$` in the commit subject.
    FromSubject,
}

#[derive(Debug, Clone)]
pub struct LandingConfig {
    pub repo: String,
    pub branch: String,
    pub review_system: String,
    pub initial_commit: String,
    pub method: ExtractionMethod,
    /// In legacy mode the `Changelist` row's status is not written
    /// (§4.1), though expectation promotion still happens.
    pub legacy_mode: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LandingReport {
    pub repo: String,
    pub commits_scanned: usize,
    pub changelists_landed: usize,
    pub unparsable_skipped: usize,
    pub no_op: bool,
}

pub struct LandingReconciler<R: RepoHost> {
    repo_host: Arc<R>,
    commit_store: Arc<CommitStore>,
    changelist_store: Arc<ChangelistStore>,
    expectation_store: Arc<ExpectationStore>,
    guard: CycleGuard,
    reviewed_on_re: Regex,
    from_subject_re: Regex,
}

impl<R: RepoHost> LandingReconciler<R> {
    pub fn new(
        repo_host: Arc<R>,
        commit_store: Arc<CommitStore>,
        changelist_store: Arc<ChangelistStore>,
        expectation_store: Arc<ExpectationStore>,
    ) -> Self {
        Self {
            repo_host,
            commit_store,
            changelist_store,
            expectation_store,
            guard: CycleGuard::new(),
            // Anchored to the line's end so a commit with extra
            // trailing footers still matches; `(?m)` so `$` matches
            // per-line within a multi-line body.
            reviewed_on_re: Regex::new(r"(?m)^Reviewed-on:.*/(\d+)\s*$").expect("valid regex"),
            from_subject_re: Regex::new(r"\(#(\d+)\)\s*$").expect("valid regex"),
        }
    }

    pub async fn cycle(&self, cfg: &LandingConfig) -> Result<Option<LandingReport>> {
        let Some(_permit) = self.guard.try_enter() else {
            tracing::debug!(repo = %cfg.repo, "landing cycle already in flight, skipping");
            return Ok(None);
        };
        self.run_cycle(cfg).await.map(Some)
    }

    async fn run_cycle(&self, cfg: &LandingConfig) -> Result<LandingReport> {
        let from_hash = match self.commit_store.get_tracking(&cfg.repo).await? {
            Some(hash) => hash,
            None => {
                // Self-healing bootstrap: seed from the configured
                // anchor rather than erroring on a cold start.
                self.commit_store.set_tracking(&cfg.repo, &cfg.initial_commit).await?;
                cfg.initial_commit.clone()
            }
        };

        let head = self.repo_host.log(&cfg.repo, &cfg.branch, 1).await?;
        let Some(head_ref) = head.first() else {
            return Ok(LandingReport { repo: cfg.repo.clone(), no_op: true, ..Default::default() });
        };

        if head_ref.git_hash == from_hash {
            return Ok(LandingReport { repo: cfg.repo.clone(), no_op: true, ..Default::default() });
        }

        let commits = self.repo_host.log_first_parent(&cfg.repo, &from_hash, &head_ref.git_hash).await?;
        let mut report = LandingReport { repo: cfg.repo.clone(), commits_scanned: commits.len(), ..Default::default() };

        for commit in &commits {
            match self.extract_external_id(cfg.method, commit) {
                Some(external_id) => {
                    self.land(cfg, commit, &external_id).await?;
                    report.changelists_landed += 1;
                }
                None => {
                    report.unparsable_skipped += 1;
                }
            }
        }

        self.commit_store.set_tracking(&cfg.repo, &head_ref.git_hash).await?;
        tracing::info!(
            repo = %cfg.repo,
            landed = report.changelists_landed,
            skipped = report.unparsable_skipped,
            "landing cycle complete"
        );
        Ok(report)
    }

    fn extract_external_id(&self, method: ExtractionMethod, commit: &LongCommit) -> Option<String> {
        match method {
            ExtractionMethod::ReviewedLine => {
                self.reviewed_on_re.captures_iter(&commit.body).last().map(|c| c[1].to_string())
            }
            ExtractionMethod::FromSubject => {
                self.from_subject_re.captures(&commit.subject).map(|c| c[1].to_string())
            }
        }
    }

    async fn land(&self, cfg: &LandingConfig, commit: &LongCommit, external_id: &str) -> Result<()> {
        let cl_id = format!("{}_{external_id}", cfg.review_system);

        if self.changelist_store.get(&cl_id).await?.is_none() {
            let mut cl = Changelist::new(cfg.review_system.clone(), external_id);
            cl.id = cl_id.clone();
            self.changelist_store.upsert(&cl).await?;
        }
        self.changelist_store.mark_landed(&cl_id, cfg.legacy_mode).await?;

        // Re-fetch after `mark_landed` so we see its status write and
        // don't clobber it below. `expectations_promoted` gates the
        // promotion itself: a cycle that crashes after `land()` but
        // before `TrackingCommits` advances replays this same commit,
        // and the flag makes that replay a no-op (§8 invariant 6)
        // rather than inserting a second promoted record.
        let mut cl = self
            .changelist_store
            .get(&cl_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("changelist {cl_id} vanished mid-land")))?;
        if cl.expectations_promoted {
            return Ok(());
        }

        self.expectation_store
            .promote_cl_to_primary(&cl_id, commit.author_email.clone(), commit.commit_time, Uuid::now_v7())
            .await?;
        cl.expectations_promoted = true;
        self.changelist_store.upsert(&cl).await?;
        Ok(())
    }
}
