//! `Expectations` (§6): the current, merged `(groupingId, digest) ->
//! label` view primary-branch triage resolves to.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "expectations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub grouping_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub digest: String,
    pub label: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
