//! `GitCommits` (§6): one row per observed commit, created once by the
//! indexer and never mutated afterwards.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "git_commits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub git_hash: String,
    pub repo: String,
    #[sea_orm(unique)]
    pub commit_id: String,
    pub commit_time: DateTime<Utc>,
    pub author_email: String,
    pub subject: String,
    pub body: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
