//! `Tasks` (§6, §4.2). Composite fields that don't fit a scalar column
//! (`parent_task_ids`, `jobs`) are stored as JSON text; the store layer
//! is responsible for (de)serializing them against `model::Task`.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "tasks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub repo: String,
    pub revision: String,
    pub name: String,
    pub forced_job_id: Option<Uuid>,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub status: String,
    pub retry_of: Option<Uuid>,
    pub attempt: i32,
    pub max_attempts: i32,
    pub parent_task_ids: Json,
    pub farm_task_id: Option<String>,
    pub isolated_output: Option<String>,
    pub jobs: Json,
    pub db_modified: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
