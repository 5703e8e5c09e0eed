//! Task persistence (§4.2): CRUD, `dbModified` optimistic concurrency,
//! chunked bulk insert, and ranged reads, fanned out over a
//! [`ModStream`].

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use uuid::Uuid;

use crate::errors::{Result, SchedulerError};
use crate::model::task::{Task, TaskKey, TaskStatus};
use crate::store::entities::task as task_entity;
use crate::store::mod_stream::ModStream;

/// Writes larger than this are chunked; each chunk is all-or-nothing
/// (§4.2 "Bulk insert").
pub const MAX_TRANSACTION_SIZE: usize = 500;

pub struct TaskStore {
    db: DatabaseConnection,
    stream: ModStream<Task>,
}

impl TaskStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db, stream: ModStream::new() }
    }

    pub fn subscribe(&self) -> tokio::sync::mpsc::Receiver<Vec<Task>> {
        self.stream.subscribe()
    }

    pub async fn get(&self, id: Uuid) -> Result<Task> {
        let row = task_entity::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("task {id}")))?;
        model_to_task(row)
    }

    /// Insert a single freshly-created Pending task.
    pub async fn insert(&self, task: &Task) -> Result<()> {
        let active = task_to_active_model(task)?;
        active.insert(&self.db).await?;
        self.stream.publish(vec![task.clone()]);
        Ok(())
    }

    /// Chunked bulk insert: each chunk of up to [`MAX_TRANSACTION_SIZE`]
    /// rows is validated (non-zero `created`, fresh `db_modified`)
    /// before any row in the chunk is persisted.
    pub async fn insert_many(&self, tasks: &[Task]) -> Result<()> {
        for chunk in tasks.chunks(MAX_TRANSACTION_SIZE) {
            for task in chunk {
                if task.created.timestamp() == 0 {
                    return Err(SchedulerError::InvalidSpec(format!(
                        "task {} has zero created timestamp",
                        task.id
                    )));
                }
                if task.db_modified < task.created {
                    return Err(SchedulerError::InvalidSpec(format!(
                        "task {} has db_modified before created",
                        task.id
                    )));
                }
            }
            let models: Vec<task_entity::ActiveModel> =
                chunk.iter().map(task_to_active_model).collect::<Result<_>>()?;
            task_entity::Entity::insert_many(models).exec(&self.db).await?;
            self.stream.publish(chunk.to_vec());
        }
        Ok(())
    }

    /// Write `task` back, enforcing optimistic concurrency against
    /// `expected_db_modified` (the snapshot the caller last read). On
    /// success, `db_modified` is bumped strictly past both the stored
    /// value and the current wall clock (§4.2, §8 invariant 4).
    pub async fn update(&self, task: &Task, expected_db_modified: DateTime<Utc>, now: DateTime<Utc>) -> Result<Task> {
        let stored = task_entity::Entity::find_by_id(task.id)
            .one(&self.db)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("task {}", task.id)))?;

        if stored.db_modified != expected_db_modified {
            return Err(SchedulerError::ConcurrentUpdate(format!("task {}", task.id)));
        }

        let mut updated = task.clone();
        updated.db_modified = next_db_modified(stored.db_modified, now);

        let active = task_to_active_model(&updated)?;
        active.update(&self.db).await?;
        self.stream.publish(vec![updated.clone()]);
        Ok(updated)
    }

    /// `GetTasksFromDateRange` (§4.2): `created ∈ [start, end)`,
    /// optionally filtered to one repo, sorted by `(created, id)`.
    pub async fn get_tasks_from_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        repo: Option<&str>,
    ) -> Result<Vec<Task>> {
        let mut query = task_entity::Entity::find()
            .filter(task_entity::Column::Created.gte(start))
            .filter(task_entity::Column::Created.lt(end));
        if let Some(repo) = repo {
            query = query.filter(task_entity::Column::Repo.eq(repo));
        }
        let rows = query
            .order_by_asc(task_entity::Column::Created)
            .order_by_asc(task_entity::Column::Id)
            .all(&self.db)
            .await?;
        rows.into_iter().map(model_to_task).collect()
    }

    /// Tasks currently Pending or Running for the given key's `(repo,
    /// revision, name, forced_job_id)`, used by the scheduler's dedup
    /// check (§4.5 invariant: no two tasks with an identical key are
    /// simultaneously Pending/Running).
    pub async fn find_active_by_key(&self, key: &TaskKey) -> Result<Vec<Task>> {
        let rows = task_entity::Entity::find()
            .filter(task_entity::Column::Repo.eq(key.repo.clone()))
            .filter(task_entity::Column::Revision.eq(key.revision.clone()))
            .filter(task_entity::Column::Name.eq(key.name.clone()))
            .filter(forced_job_id_filter(key.forced_job_id))
            .all(&self.db)
            .await?;
        rows.into_iter()
            .map(model_to_task)
            .filter(|t| matches!(t, Ok(t) if matches!(t.status, TaskStatus::Pending | TaskStatus::Running)))
            .collect()
    }

    /// All attempts recorded for `key`, newest first — the scheduler
    /// uses this for parent-satisfaction checks and idempotent reuse
    /// (§4.5 steps 2 and 7).
    pub async fn find_all_by_key(&self, key: &TaskKey) -> Result<Vec<Task>> {
        let rows = task_entity::Entity::find()
            .filter(task_entity::Column::Repo.eq(key.repo.clone()))
            .filter(task_entity::Column::Revision.eq(key.revision.clone()))
            .filter(task_entity::Column::Name.eq(key.name.clone()))
            .filter(forced_job_id_filter(key.forced_job_id))
            .order_by_desc(task_entity::Column::Created)
            .all(&self.db)
            .await?;
        rows.into_iter().map(model_to_task).collect()
    }

    /// Resolve a farm pub/sub status transition back to our row. The
    /// farm's own task id is the only handle a notification carries.
    pub async fn find_by_farm_task_id(&self, farm_task_id: &str) -> Result<Option<Task>> {
        let row = task_entity::Entity::find()
            .filter(task_entity::Column::FarmTaskId.eq(farm_task_id))
            .one(&self.db)
            .await?;
        row.map(model_to_task).transpose()
    }
}

/// `TaskKey.forced_job_id` is part of the key: a force-triggered task
/// for one job must never be confused with the non-forced task (or a
/// different job's forced task) at the same `(repo, revision, name)`.
fn forced_job_id_filter(forced_job_id: Option<Uuid>) -> sea_orm::Condition {
    match forced_job_id {
        Some(id) => sea_orm::Condition::all().add(task_entity::Column::ForcedJobId.eq(id)),
        None => sea_orm::Condition::all().add(task_entity::Column::ForcedJobId.is_null()),
    }
}

/// Bump strictly past `old`: if the wall clock has already advanced
/// past it, use the wall clock; otherwise add the smallest
/// representable unit so two writes in the same tick still produce a
/// strictly increasing sequence.
fn next_db_modified(old: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > old {
        now
    } else {
        old + Duration::nanoseconds(1)
    }
}

fn task_to_active_model(task: &Task) -> Result<task_entity::ActiveModel> {
    Ok(task_entity::ActiveModel {
        id: Set(task.id),
        repo: Set(task.task_key.repo.clone()),
        revision: Set(task.task_key.revision.clone()),
        name: Set(task.task_key.name.clone()),
        forced_job_id: Set(task.task_key.forced_job_id),
        created: Set(task.created),
        started: Set(task.started),
        finished: Set(task.finished),
        status: Set(task.status.as_str().to_string()),
        retry_of: Set(task.retry_of),
        attempt: Set(task.attempt as i32),
        max_attempts: Set(task.max_attempts as i32),
        parent_task_ids: Set(serde_json::to_value(&task.parent_task_ids)?),
        farm_task_id: Set(task.farm_task_id.clone()),
        isolated_output: Set(task.isolated_output.clone()),
        jobs: Set(serde_json::to_value(&task.jobs)?),
        db_modified: Set(task.db_modified),
    })
}

fn model_to_task(row: task_entity::Model) -> Result<Task> {
    let status = parse_status(&row.status)?;
    let parent_task_ids: Vec<Uuid> = serde_json::from_value(row.parent_task_ids)?;
    let jobs: HashSet<Uuid> = serde_json::from_value(row.jobs)?;
    Ok(Task {
        id: row.id,
        task_key: TaskKey {
            repo: row.repo,
            revision: row.revision,
            name: row.name,
            forced_job_id: row.forced_job_id,
        },
        created: row.created,
        started: row.started,
        finished: row.finished,
        status,
        retry_of: row.retry_of,
        attempt: row.attempt as u32,
        max_attempts: row.max_attempts as u32,
        parent_task_ids,
        farm_task_id: row.farm_task_id,
        isolated_output: row.isolated_output,
        jobs,
        db_modified: row.db_modified,
    })
}

fn parse_status(s: &str) -> Result<TaskStatus> {
    Ok(match s {
        "pending" => TaskStatus::Pending,
        "running" => TaskStatus::Running,
        "success" => TaskStatus::Success,
        "failure" => TaskStatus::Failure,
        "mishap" => TaskStatus::Mishap,
        other => return Err(SchedulerError::InvalidSpec(format!("unknown task status: {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectionTrait, Database, Schema};

    async fn test_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let builder = db.get_database_backend();
        let schema = Schema::new(builder);
        let stmt = builder.build(&schema.create_table_from_entity(task_entity::Entity));
        db.execute(stmt).await.unwrap();
        db
    }

    fn key() -> TaskKey {
        TaskKey { repo: "repo".into(), revision: "deadbeef".into(), name: "build".into(), forced_job_id: None }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let db = test_db().await;
        let store = TaskStore::new(db);
        let now = Utc::now();
        let task = Task::new_pending(key(), 3, now);
        store.insert(&task).await.unwrap();

        let fetched = store.get(task.id).await.unwrap();
        assert_eq!(fetched.task_key, task.task_key);
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn update_with_stale_snapshot_is_rejected() {
        let db = test_db().await;
        let store = TaskStore::new(db);
        let now = Utc::now();
        let mut task = Task::new_pending(key(), 3, now);
        store.insert(&task).await.unwrap();

        let stale_snapshot = task.db_modified;
        task.status = TaskStatus::Running;
        store.update(&task, stale_snapshot, now).await.unwrap();

        // Second writer still presents the now-stale snapshot.
        let err = store.update(&task, stale_snapshot, now).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ConcurrentUpdate(_)));
    }

    #[tokio::test]
    async fn update_bumps_db_modified_strictly_forward() {
        let db = test_db().await;
        let store = TaskStore::new(db);
        let now = Utc::now();
        let mut task = Task::new_pending(key(), 3, now);
        store.insert(&task).await.unwrap();

        let snapshot = task.db_modified;
        task.finish(TaskStatus::Success, None, now);
        let updated = store.update(&task, snapshot, now).await.unwrap();
        assert!(updated.db_modified > snapshot);
    }

    #[tokio::test]
    async fn find_by_key_distinguishes_forced_job_id() {
        let db = test_db().await;
        let store = TaskStore::new(db);
        let now = Utc::now();
        let commit_task = Task::new_pending(key(), 3, now);
        store.insert(&commit_task).await.unwrap();

        let forcing_job = Uuid::now_v7();
        let mut forced_key = key();
        forced_key.forced_job_id = Some(forcing_job);
        let forced_task = Task::new_pending(forced_key.clone(), 3, now);
        store.insert(&forced_task).await.unwrap();

        let active_for_commit = store.find_active_by_key(&key()).await.unwrap();
        assert_eq!(active_for_commit.len(), 1);
        assert_eq!(active_for_commit[0].id, commit_task.id);

        let active_for_forced = store.find_active_by_key(&forced_key).await.unwrap();
        assert_eq!(active_for_forced.len(), 1);
        assert_eq!(active_for_forced[0].id, forced_task.id);

        let mut other_job_key = key();
        other_job_key.forced_job_id = Some(Uuid::now_v7());
        assert!(store.find_active_by_key(&other_job_key).await.unwrap().is_empty());

        assert_eq!(store.find_all_by_key(&key()).await.unwrap().len(), 1);
        assert_eq!(store.find_all_by_key(&forced_key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bulk_insert_chunks_and_validates_first() {
        let db = test_db().await;
        let store = TaskStore::new(db);
        let now = Utc::now();
        let tasks: Vec<Task> = (0..3)
            .map(|i| Task::new_pending(
                TaskKey { repo: "repo".into(), revision: "deadbeef".into(), name: format!("t{i}"), forced_job_id: None },
                3,
                now,
            ))
            .collect();
        store.insert_many(&tasks).await.unwrap();

        let range = store
            .get_tasks_from_date_range(now - Duration::seconds(1), now + Duration::seconds(1), Some("repo"))
            .await
            .unwrap();
        assert_eq!(range.len(), 3);
    }
}
