//! `Expectations` / `ExpectationRecords` / `ExpectationDeltas` (§6,
//! §4.1 changelist-landing reconciliation).

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::errors::Result;
use crate::model::expectation::{promote_to_primary, ExpectationDelta, ExpectationRecord, Label};
use crate::store::entities::{expectation, expectation_delta, expectation_record};

pub struct ExpectationStore {
    db: DatabaseConnection,
}

impl ExpectationStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Persist a triage record and its deltas, and fold the deltas into
    /// the merged `Expectations` view (last-writer-wins per
    /// `(grouping_id, digest)`).
    pub async fn insert_record(&self, record: &ExpectationRecord) -> Result<()> {
        expectation_record::ActiveModel {
            id: Set(record.id),
            cl_id: Set(record.cl_id.clone()),
            user: Set(record.user.clone()),
            triage_time: Set(record.triage_time),
            num_changes: Set(record.num_changes as i32),
        }
        .insert(&self.db)
        .await?;

        for delta in &record.deltas {
            expectation_delta::ActiveModel {
                id: sea_orm::NotSet,
                record_id: Set(record.id),
                grouping_id: Set(delta.grouping_id.clone()),
                digest: Set(delta.digest.clone()),
                label: Set(label_as_str(delta.label).to_string()),
            }
            .insert(&self.db)
            .await?;

            upsert_expectation(&self.db, delta).await?;
        }
        Ok(())
    }

    /// All changelist-scoped records for `cl_id`, oldest first, the
    /// input to [`promote_to_primary`].
    pub async fn list_records_for_cl(&self, cl_id: &str) -> Result<Vec<ExpectationRecord>> {
        let records = expectation_record::Entity::find()
            .filter(expectation_record::Column::ClId.eq(cl_id))
            .all(&self.db)
            .await?;
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let deltas = expectation_delta::Entity::find()
                .filter(expectation_delta::Column::RecordId.eq(record.id))
                .all(&self.db)
                .await?;
            out.push(ExpectationRecord {
                id: record.id,
                cl_id: record.cl_id,
                user: record.user,
                triage_time: record.triage_time,
                deltas: deltas
                    .into_iter()
                    .map(|d| Ok(ExpectationDelta { grouping_id: d.grouping_id, digest: d.digest, label: parse_label(&d.label)? }))
                    .collect::<Result<Vec<_>>>()?,
                num_changes: record.num_changes as u32,
            });
        }
        Ok(out)
    }

    /// Fold every changelist-scoped record for `cl_id` into one
    /// primary-branch record (§4.1). Idempotent in effect: a CL with no
    /// triage activity promotes to nothing (§8 invariant 6).
    pub async fn promote_cl_to_primary(
        &self,
        cl_id: &str,
        user: impl Into<String>,
        triage_time: DateTime<Utc>,
        record_id: Uuid,
    ) -> Result<Option<ExpectationRecord>> {
        let cl_records = self.list_records_for_cl(cl_id).await?;
        let Some(promoted) = promote_to_primary(&cl_records, user, triage_time, record_id) else {
            return Ok(None);
        };
        self.insert_record(&promoted).await?;
        Ok(Some(promoted))
    }
}

async fn upsert_expectation(db: &DatabaseConnection, delta: &ExpectationDelta) -> Result<()> {
    let existing = expectation::Entity::find()
        .filter(expectation::Column::GroupingId.eq(delta.grouping_id.clone()))
        .filter(expectation::Column::Digest.eq(delta.digest.clone()))
        .one(db)
        .await?;
    let active = expectation::ActiveModel {
        grouping_id: Set(delta.grouping_id.clone()),
        digest: Set(delta.digest.clone()),
        label: Set(label_as_str(delta.label).to_string()),
    };
    if existing.is_some() {
        active.update(db).await?;
    } else {
        active.insert(db).await?;
    }
    Ok(())
}

fn label_as_str(label: Label) -> &'static str {
    match label {
        Label::Positive => "positive",
        Label::Negative => "negative",
        Label::Untriaged => "untriaged",
    }
}

fn parse_label(s: &str) -> Result<Label> {
    Ok(match s {
        "positive" => Label::Positive,
        "negative" => Label::Negative,
        "untriaged" => Label::Untriaged,
        other => return Err(crate::errors::SchedulerError::InvalidSpec(format!("unknown label: {other}"))),
    })
}
