//! `GitCommits` / `TrackingCommits` persistence (§4.1, §6), consumed by
//! the commit indexer.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::errors::Result;
use crate::model::commit::{Commit, CommitId};
use crate::store::entities::{git_commit, tracking_commit};

pub struct CommitStore {
    db: DatabaseConnection,
}

impl CommitStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// The stored commit with the lexicographically greatest
    /// `commit_id` for `repo`, i.e. the current head of the indexed
    /// range (§4.1 "Incremental update").
    pub async fn max_commit(&self, repo: &str) -> Result<Option<Commit>> {
        let row = git_commit::Entity::find()
            .filter(git_commit::Column::Repo.eq(repo))
            .order_by_desc(git_commit::Column::CommitId)
            .one(&self.db)
            .await?;
        row.map(model_to_commit).transpose()
    }

    /// Persist newly discovered commits. Callers are expected to have
    /// already assigned dense, ordered `CommitId`s (§4.1); this is a
    /// straight append, never an update, per the commit lifecycle
    /// invariant.
    pub async fn insert_commits(&self, repo: &str, commits: &[Commit]) -> Result<()> {
        if commits.is_empty() {
            return Ok(());
        }
        let models: Vec<git_commit::ActiveModel> = commits
            .iter()
            .map(|c| git_commit::ActiveModel {
                git_hash: Set(c.git_hash.clone()),
                repo: Set(repo.to_string()),
                commit_id: Set(c.commit_id.as_str().to_string()),
                commit_time: Set(c.commit_time),
                author_email: Set(c.author_email.clone()),
                subject: Set(c.subject.clone()),
                body: Set(c.body.clone()),
            })
            .collect();
        git_commit::Entity::insert_many(models).exec(&self.db).await?;
        Ok(())
    }

    /// Commits for `repo` with `commit_time >= since`, newest first —
    /// the scheduler's window-widening candidate source (§4.5 step 1).
    pub async fn commits_since(&self, repo: &str, since: DateTime<Utc>) -> Result<Vec<Commit>> {
        let rows = git_commit::Entity::find()
            .filter(git_commit::Column::Repo.eq(repo))
            .filter(git_commit::Column::CommitTime.gte(since))
            .order_by_desc(git_commit::Column::CommitId)
            .all(&self.db)
            .await?;
        rows.into_iter().map(model_to_commit).collect()
    }

    pub async fn get_tracking(&self, repo: &str) -> Result<Option<String>> {
        Ok(tracking_commit::Entity::find_by_id(repo.to_string())
            .one(&self.db)
            .await?
            .map(|row| row.last_git_hash))
    }

    /// Seed or advance `TrackingCommits` for `repo`. Seeding on first
    /// observation is the "TrackingCommits self-healing bootstrap"
    /// supplemented feature.
    pub async fn set_tracking(&self, repo: &str, last_git_hash: &str) -> Result<()> {
        let existing = tracking_commit::Entity::find_by_id(repo.to_string()).one(&self.db).await?;
        let active = tracking_commit::ActiveModel {
            repo: Set(repo.to_string()),
            last_git_hash: Set(last_git_hash.to_string()),
        };
        if existing.is_some() {
            active.update(&self.db).await?;
        } else {
            active.insert(&self.db).await?;
        }
        Ok(())
    }
}

fn model_to_commit(row: git_commit::Model) -> Result<Commit> {
    Ok(Commit {
        git_hash: row.git_hash,
        commit_id: CommitId::from(row.commit_id),
        commit_time: row.commit_time,
        author_email: row.author_email,
        subject: row.subject,
        body: row.body,
    })
}
