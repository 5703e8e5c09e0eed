//! `Jobs` (§6, §4.2). `tasks` and `dependencies` are JSON text columns;
//! the cycle between tasks and jobs is broken at the storage layer per
//! §9 — each entity stores only its own identity and the graph is
//! materialized at read time.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub repo: String,
    pub revision: String,
    pub name: String,
    pub changelist_patch: Option<String>,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub status: String,
    pub tasks: Json,
    pub dependencies: Json,
    pub priority: f64,
    pub requested_at: DateTime<Utc>,
    pub is_force: bool,
    pub db_modified: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
