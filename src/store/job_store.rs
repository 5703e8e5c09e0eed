//! Job persistence (§4.2), mirroring [`crate::store::task_store`]:
//! same `dbModified` optimistic-concurrency discipline, same
//! modification-stream fan-out.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use uuid::Uuid;

use crate::errors::{Result, SchedulerError};
use crate::model::job::{Job, JobKey, JobStatus, TaskSummary};
use crate::store::entities::job as job_entity;
use crate::store::mod_stream::ModStream;

pub const MAX_TRANSACTION_SIZE: usize = 500;

pub struct JobStore {
    db: DatabaseConnection,
    stream: ModStream<Job>,
}

impl JobStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db, stream: ModStream::new() }
    }

    pub fn subscribe(&self) -> tokio::sync::mpsc::Receiver<Vec<Job>> {
        self.stream.subscribe()
    }

    pub async fn get(&self, id: Uuid) -> Result<Job> {
        let row = job_entity::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("job {id}")))?;
        model_to_job(row)
    }

    pub async fn insert(&self, job: &Job) -> Result<()> {
        let active = job_to_active_model(job)?;
        active.insert(&self.db).await?;
        self.stream.publish(vec![job.clone()]);
        Ok(())
    }

    pub async fn insert_many(&self, jobs: &[Job]) -> Result<()> {
        for chunk in jobs.chunks(MAX_TRANSACTION_SIZE) {
            for job in chunk {
                if job.created.timestamp() == 0 {
                    return Err(SchedulerError::InvalidSpec(format!("job {} has zero created timestamp", job.id)));
                }
            }
            let models: Vec<job_entity::ActiveModel> =
                chunk.iter().map(job_to_active_model).collect::<Result<_>>()?;
            job_entity::Entity::insert_many(models).exec(&self.db).await?;
            self.stream.publish(chunk.to_vec());
        }
        Ok(())
    }

    pub async fn update(&self, job: &Job, expected_db_modified: DateTime<Utc>, now: DateTime<Utc>) -> Result<Job> {
        let stored = job_entity::Entity::find_by_id(job.id)
            .one(&self.db)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("job {}", job.id)))?;

        if stored.db_modified != expected_db_modified {
            return Err(SchedulerError::ConcurrentUpdate(format!("job {}", job.id)));
        }

        let mut updated = job.clone();
        updated.db_modified = next_db_modified(stored.db_modified, now);

        let active = job_to_active_model(&updated)?;
        active.update(&self.db).await?;
        self.stream.publish(vec![updated.clone()]);
        Ok(updated)
    }

    pub async fn get_jobs_from_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        repo: Option<&str>,
    ) -> Result<Vec<Job>> {
        let mut query = job_entity::Entity::find()
            .filter(job_entity::Column::Created.gte(start))
            .filter(job_entity::Column::Created.lt(end));
        if let Some(repo) = repo {
            query = query.filter(job_entity::Column::Repo.eq(repo));
        }
        let rows = query
            .order_by_asc(job_entity::Column::Created)
            .order_by_asc(job_entity::Column::Id)
            .all(&self.db)
            .await?;
        rows.into_iter().map(model_to_job).collect()
    }

    /// Look up the job already created for a `JobKey`, if any —
    /// scheduler commit-job creation (§4.5, §3 "Jobs: created from
    /// commits (C5)") uses this to avoid creating duplicates on
    /// repeated ticks over the same revision.
    pub async fn find_by_key(&self, key: &JobKey) -> Result<Option<Job>> {
        let row = job_entity::Entity::find()
            .filter(job_entity::Column::Repo.eq(key.repo.clone()))
            .filter(job_entity::Column::Revision.eq(key.revision.clone()))
            .filter(job_entity::Column::Name.eq(key.name.clone()))
            .filter(match &key.changelist_patch {
                Some(patch) => job_entity::Column::ChangelistPatch.eq(patch.clone()),
                None => job_entity::Column::ChangelistPatch.is_null(),
            })
            .one(&self.db)
            .await?;
        row.map(model_to_job).transpose()
    }

    /// All jobs not yet terminal touching the given revision, the
    /// scheduler's candidate-enumeration seed (§4.5 step 2).
    pub async fn find_in_progress_by_revision(&self, repo: &str, revision: &str) -> Result<Vec<Job>> {
        let rows = job_entity::Entity::find()
            .filter(job_entity::Column::Repo.eq(repo))
            .filter(job_entity::Column::Revision.eq(revision))
            .filter(job_entity::Column::Status.eq("in_progress"))
            .all(&self.db)
            .await?;
        rows.into_iter().map(model_to_job).collect()
    }
}

fn next_db_modified(old: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > old {
        now
    } else {
        old + Duration::nanoseconds(1)
    }
}

fn job_to_active_model(job: &Job) -> Result<job_entity::ActiveModel> {
    Ok(job_entity::ActiveModel {
        id: Set(job.id),
        repo: Set(job.job_key.repo.clone()),
        revision: Set(job.job_key.revision.clone()),
        name: Set(job.job_key.name.clone()),
        changelist_patch: Set(job.job_key.changelist_patch.clone()),
        created: Set(job.created),
        started: Set(job.started),
        finished: Set(job.finished),
        status: Set(status_as_str(job.status).to_string()),
        tasks: Set(serde_json::to_value(&job.tasks)?),
        dependencies: Set(serde_json::to_value(&job.dependencies)?),
        priority: Set(job.priority),
        requested_at: Set(job.requested_at),
        is_force: Set(job.is_force),
        db_modified: Set(job.db_modified),
    })
}

fn model_to_job(row: job_entity::Model) -> Result<Job> {
    let status = parse_status(&row.status)?;
    let tasks: HashMap<String, Vec<TaskSummary>> = serde_json::from_value(row.tasks)?;
    let dependencies: HashMap<String, Vec<String>> = serde_json::from_value(row.dependencies)?;
    Ok(Job {
        id: row.id,
        job_key: JobKey {
            repo: row.repo,
            revision: row.revision,
            name: row.name,
            changelist_patch: row.changelist_patch,
        },
        created: row.created,
        started: row.started,
        finished: row.finished,
        status,
        tasks,
        dependencies,
        priority: row.priority,
        requested_at: row.requested_at,
        is_force: row.is_force,
        db_modified: row.db_modified,
    })
}

fn status_as_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::InProgress => "in_progress",
        JobStatus::Success => "success",
        JobStatus::Failure => "failure",
        JobStatus::Mishap => "mishap",
        JobStatus::Canceled => "canceled",
    }
}

fn parse_status(s: &str) -> Result<JobStatus> {
    Ok(match s {
        "in_progress" => JobStatus::InProgress,
        "success" => JobStatus::Success,
        "failure" => JobStatus::Failure,
        "mishap" => JobStatus::Mishap,
        "canceled" => JobStatus::Canceled,
        other => return Err(SchedulerError::InvalidSpec(format!("unknown job status: {other}"))),
    })
}
