//! `ExpectationDeltas` (§6): individual `(groupingId, digest) -> label`
//! assignments belonging to one [`super::expectation_record`].

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "expectation_deltas")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    pub record_id: Uuid,
    pub grouping_id: String,
    pub digest: String,
    pub label: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::expectation_record::Entity",
        from = "Column::RecordId",
        to = "super::expectation_record::Column::Id"
    )]
    ExpectationRecord,
}

impl Related<super::expectation_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExpectationRecord.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
