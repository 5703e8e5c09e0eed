//! Commit Indexer (§4.1, C1): mirrors watched repositories and assigns
//! each new first-parent commit a dense, monotonically increasing
//! commit-ID string.

pub mod landing;

use std::sync::Arc;

use crate::errors::Result;
use crate::external::RepoHost;
use crate::guard::SingleFlightGuard as CycleGuard;
use crate::model::commit::{Commit, CommitId};
use crate::store::CommitStore;

/// Per-repository indexing configuration (§6 scheduler flags: `--repo`
/// is repeatable; `prefix`/`initial_commit` are the per-family
/// counter seed described in §4.1).
#[derive(Debug, Clone)]
pub struct RepoIndexConfig {
    pub repo: String,
    pub branch: String,
    pub prefix: String,
    pub initial_commit: String,
}

/// Summary of one `update_cycle` invocation, logged at `info!` (the
/// "structured tick/cycle summaries" supplemented feature).
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub repo: String,
    pub commits_added: usize,
    pub no_op: bool,
}

pub struct CommitIndexer<R: RepoHost> {
    repo_host: Arc<R>,
    commit_store: Arc<CommitStore>,
    guard: CycleGuard,
}

impl<R: RepoHost> CommitIndexer<R> {
    pub fn new(repo_host: Arc<R>, commit_store: Arc<CommitStore>) -> Self {
        Self { repo_host, commit_store, guard: CycleGuard::new() }
    }

    /// One indexing cycle for `cfg.repo` (§4.1 "Incremental update").
    /// Returns `Ok(None)` if another cycle for this indexer is already
    /// in flight (the guard dropped this attempt rather than queuing
    /// it, per §9).
    pub async fn update_cycle(&self, cfg: &RepoIndexConfig) -> Result<Option<IndexReport>> {
        let Some(_permit) = self.guard.try_enter() else {
            tracing::debug!(repo = %cfg.repo, "index cycle already in flight, skipping");
            return Ok(None);
        };
        self.run_cycle(cfg).await.map(Some)
    }

    async fn run_cycle(&self, cfg: &RepoIndexConfig) -> Result<IndexReport> {
        let current = self.commit_store.max_commit(&cfg.repo).await?;
        let (from_hash, counter) = match &current {
            Some(commit) => {
                let counter = commit.commit_id.counter(&cfg.prefix).unwrap_or(0);
                (commit.git_hash.clone(), counter)
            }
            None => (cfg.initial_commit.clone(), 0),
        };

        let head = self.repo_host.log(&cfg.repo, &cfg.branch, 1).await?;
        let Some(head_ref) = head.first() else {
            tracing::warn!(repo = %cfg.repo, "repo host returned an empty log");
            return Ok(IndexReport { repo: cfg.repo.clone(), commits_added: 0, no_op: true });
        };

        // S3: head unchanged since last cycle — skip LogFirstParent
        // entirely, the cycle is a pure no-op.
        if head_ref.git_hash == from_hash {
            return Ok(IndexReport { repo: cfg.repo.clone(), commits_added: 0, no_op: true });
        }

        let new_commits = self.repo_host.log_first_parent(&cfg.repo, &from_hash, &head_ref.git_hash).await?;
        let n = new_commits.len();

        // `new_commits` is newest-first; the oldest new commit gets the
        // smallest new counter (counter + 1).
        let commits: Vec<Commit> = new_commits
            .into_iter()
            .enumerate()
            .map(|(i, lc)| {
                let id_counter = counter + (n - i) as u64;
                Commit::new(lc.git_hash, CommitId::new(&cfg.prefix, id_counter), lc.commit_time, lc.author_email, lc.subject, lc.body)
            })
            .collect();

        self.commit_store.insert_commits(&cfg.repo, &commits).await?;

        tracing::info!(repo = %cfg.repo, commits_added = n, "index cycle complete");
        Ok(IndexReport { repo: cfg.repo.clone(), commits_added: n, no_op: false })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use sea_orm::{ConnectionTrait, Database, Schema};

    use super::*;
    use crate::external::repo_host::{CommitRef, LongCommit};
    use crate::store::entities::git_commit;

    struct FakeRepoHost {
        head: String,
        first_parent_path: Vec<LongCommit>,
    }

    #[async_trait]
    impl RepoHost for FakeRepoHost {
        async fn log(&self, _repo: &str, _branch: &str, _limit: usize) -> Result<Vec<CommitRef>> {
            Ok(vec![CommitRef { git_hash: self.head.clone() }])
        }

        async fn log_first_parent(&self, _repo: &str, _from: &str, _to: &str) -> Result<Vec<LongCommit>> {
            Ok(self.first_parent_path.clone())
        }

        async fn get_file(&self, _repo: &str, _path: &str, _revision: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn lc(hash: &str) -> LongCommit {
        LongCommit { git_hash: hash.into(), author_email: "a@x.com".into(), commit_time: Utc::now(), subject: "s".into(), body: String::new() }
    }

    async fn test_commit_store() -> Arc<CommitStore> {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let builder = db.get_database_backend();
        let schema = Schema::new(builder);
        for stmt in [
            builder.build(&schema.create_table_from_entity(git_commit::Entity)),
            builder.build(&schema.create_table_from_entity(crate::store::entities::tracking_commit::Entity)),
        ] {
            db.execute(stmt).await.unwrap();
        }
        Arc::new(CommitStore::new(db))
    }

    fn cfg() -> RepoIndexConfig {
        RepoIndexConfig { repo: "repo".into(), branch: "main".into(), prefix: "001".into(), initial_commit: "0000".into() }
    }

    #[tokio::test]
    async fn s1_initial_index_assigns_ascending_counters_oldest_first() {
        let commit_store = test_commit_store().await;
        let repo_host = Arc::new(FakeRepoHost {
            head: "4444".into(),
            first_parent_path: vec![lc("4444"), lc("3333"), lc("2222")],
        });
        let indexer = CommitIndexer::new(repo_host, commit_store.clone());

        let report = indexer.update_cycle(&cfg()).await.unwrap().unwrap();
        assert_eq!(report.commits_added, 3);
        assert!(!report.no_op);

        let max = commit_store.max_commit("repo").await.unwrap().unwrap();
        assert_eq!(max.git_hash, "4444");
        assert_eq!(max.commit_id.as_str(), "001000000003");
    }

    #[tokio::test]
    async fn s3_noop_when_head_unchanged() {
        let commit_store = test_commit_store().await;
        commit_store
            .insert_commits("repo", &[Commit::new("4444", CommitId::new("001", 1), Utc::now(), "a@x.com", "s", "")])
            .await
            .unwrap();

        let repo_host = Arc::new(FakeRepoHost { head: "4444".into(), first_parent_path: vec![] });
        let indexer = CommitIndexer::new(repo_host, commit_store.clone());

        let report = indexer.update_cycle(&cfg()).await.unwrap().unwrap();
        assert!(report.no_op);
        assert_eq!(report.commits_added, 0);
    }

    #[tokio::test]
    async fn s2_incremental_index_continues_counter() {
        let commit_store = test_commit_store().await;
        commit_store
            .insert_commits(
                "repo",
                &[
                    Commit::new("2222", CommitId::new("001", 1), Utc::now(), "a@x.com", "s", ""),
                    Commit::new("3333", CommitId::new("001", 2), Utc::now(), "a@x.com", "s", ""),
                    Commit::new("4444", CommitId::new("001", 3), Utc::now(), "a@x.com", "s", ""),
                ],
            )
            .await
            .unwrap();

        let repo_host = Arc::new(FakeRepoHost { head: "6666".into(), first_parent_path: vec![lc("6666"), lc("5555")] });
        let indexer = CommitIndexer::new(repo_host, commit_store.clone());

        let report = indexer.update_cycle(&cfg()).await.unwrap().unwrap();
        assert_eq!(report.commits_added, 2);

        let max = commit_store.max_commit("repo").await.unwrap().unwrap();
        assert_eq!(max.git_hash, "6666");
        assert_eq!(max.commit_id.as_str(), "001000000005");
    }
}
