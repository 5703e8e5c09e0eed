//! `TaskComments` / `TaskSpecComments` / `CommitComments` (§4.2, §9).
//!
//! `putTaskComment`-style insertion walks existing comments for the
//! same key looking for an equal timestamp; a clash with different
//! content is a caller-visible [`SchedulerError::AlreadyExists`] (the
//! Open Question in §9 is resolved this way — callers are expected to
//! generate unique, nanosecond-resolution timestamps). A clash with
//! identical content is a harmless no-op, since it can only arise from
//! a redelivered write.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use uuid::Uuid;

use crate::errors::Result;
use crate::store::entities::{commit_comment, task_comment, task_spec_comment};

pub struct CommentStore {
    db: DatabaseConnection,
}

impl CommentStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn put_task_comment(
        &self,
        repo: &str,
        revision: &str,
        name: &str,
        timestamp: DateTime<Utc>,
        author: &str,
        message: &str,
    ) -> Result<()> {
        let existing = task_comment::Entity::find()
            .filter(task_comment::Column::Repo.eq(repo))
            .filter(task_comment::Column::Revision.eq(revision))
            .filter(task_comment::Column::Name.eq(name))
            .filter(task_comment::Column::Timestamp.eq(timestamp))
            .one(&self.db)
            .await?;
        if let Some(existing) = existing {
            return reject_or_ignore_clash(&existing.author, &existing.message, author, message, "task comment");
        }
        task_comment::ActiveModel {
            id: Set(Uuid::now_v7()),
            repo: Set(repo.to_string()),
            revision: Set(revision.to_string()),
            name: Set(name.to_string()),
            timestamp: Set(timestamp),
            author: Set(author.to_string()),
            message: Set(message.to_string()),
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    pub async fn list_task_comments(&self, repo: &str, revision: &str, name: &str) -> Result<Vec<task_comment::Model>> {
        Ok(task_comment::Entity::find()
            .filter(task_comment::Column::Repo.eq(repo))
            .filter(task_comment::Column::Revision.eq(revision))
            .filter(task_comment::Column::Name.eq(name))
            .order_by_asc(task_comment::Column::Timestamp)
            .all(&self.db)
            .await?)
    }

    pub async fn put_task_spec_comment(
        &self,
        repo: &str,
        name: &str,
        timestamp: DateTime<Utc>,
        author: &str,
        message: &str,
    ) -> Result<()> {
        let existing = task_spec_comment::Entity::find()
            .filter(task_spec_comment::Column::Repo.eq(repo))
            .filter(task_spec_comment::Column::Name.eq(name))
            .filter(task_spec_comment::Column::Timestamp.eq(timestamp))
            .one(&self.db)
            .await?;
        if let Some(existing) = existing {
            return reject_or_ignore_clash(&existing.author, &existing.message, author, message, "task spec comment");
        }
        task_spec_comment::ActiveModel {
            id: Set(Uuid::now_v7()),
            repo: Set(repo.to_string()),
            name: Set(name.to_string()),
            timestamp: Set(timestamp),
            author: Set(author.to_string()),
            message: Set(message.to_string()),
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    pub async fn put_commit_comment(
        &self,
        repo: &str,
        git_hash: &str,
        timestamp: DateTime<Utc>,
        author: &str,
        message: &str,
    ) -> Result<()> {
        let existing = commit_comment::Entity::find()
            .filter(commit_comment::Column::Repo.eq(repo))
            .filter(commit_comment::Column::GitHash.eq(git_hash))
            .filter(commit_comment::Column::Timestamp.eq(timestamp))
            .one(&self.db)
            .await?;
        if let Some(existing) = existing {
            return reject_or_ignore_clash(&existing.author, &existing.message, author, message, "commit comment");
        }
        commit_comment::ActiveModel {
            id: Set(Uuid::now_v7()),
            repo: Set(repo.to_string()),
            git_hash: Set(git_hash.to_string()),
            timestamp: Set(timestamp),
            author: Set(author.to_string()),
            message: Set(message.to_string()),
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }
}

fn reject_or_ignore_clash(
    existing_author: &str,
    existing_message: &str,
    author: &str,
    message: &str,
    kind: &str,
) -> Result<()> {
    if existing_author == author && existing_message == message {
        return Ok(());
    }
    Err(crate::errors::SchedulerError::AlreadyExists(format!(
        "{kind} at this timestamp already exists with different content"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectionTrait, Database, Schema};

    async fn test_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let builder = db.get_database_backend();
        let schema = Schema::new(builder);
        for stmt in [
            builder.build(&schema.create_table_from_entity(task_comment::Entity)),
            builder.build(&schema.create_table_from_entity(task_spec_comment::Entity)),
            builder.build(&schema.create_table_from_entity(commit_comment::Entity)),
        ] {
            db.execute(stmt).await.unwrap();
        }
        db
    }

    #[tokio::test]
    async fn duplicate_timestamp_with_different_content_is_rejected() {
        let db = test_db().await;
        let store = CommentStore::new(db);
        let ts = Utc::now();
        store.put_task_comment("repo", "rev", "build", ts, "alice", "looks flaky").await.unwrap();
        let err = store.put_task_comment("repo", "rev", "build", ts, "bob", "retried successfully").await.unwrap_err();
        assert!(matches!(err, crate::errors::SchedulerError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn duplicate_timestamp_with_identical_content_is_a_no_op() {
        let db = test_db().await;
        let store = CommentStore::new(db);
        let ts = Utc::now();
        store.put_task_comment("repo", "rev", "build", ts, "alice", "looks flaky").await.unwrap();
        store.put_task_comment("repo", "rev", "build", ts, "alice", "looks flaky").await.unwrap();

        let comments = store.list_task_comments("repo", "rev", "build").await.unwrap();
        assert_eq!(comments.len(), 1);
    }
}
