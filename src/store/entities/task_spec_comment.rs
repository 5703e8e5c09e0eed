//! `TaskSpecComments` (§4.2): notes against a task-spec name, not tied
//! to a specific revision (e.g. "this spec is known-flaky").

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "task_spec_comments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub repo: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub message: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
