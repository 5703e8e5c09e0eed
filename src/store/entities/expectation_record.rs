//! `ExpectationRecords` (§6): one row per triage batch, scoped either
//! to a changelist (`cl_id = Some(..)`) or the primary branch.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "expectation_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub cl_id: Option<String>,
    pub user: String,
    pub triage_time: DateTime<Utc>,
    pub num_changes: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::expectation_delta::Entity")]
    ExpectationDelta,
}

impl Related<super::expectation_delta::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExpectationDelta.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
