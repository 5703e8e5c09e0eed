//! `Changelists` (§6), used by the try-job intake (C6) and the
//! changelist-landing reconciler (§4.1).

use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};

use crate::errors::{Result, SchedulerError};
use crate::model::changelist::{Changelist, ChangelistStatus};
use crate::store::entities::changelist as changelist_entity;

pub struct ChangelistStore {
    db: sea_orm::DatabaseConnection,
}

impl ChangelistStore {
    pub fn new(db: sea_orm::DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Changelist>> {
        let row = changelist_entity::Entity::find_by_id(id.to_string()).one(&self.db).await?;
        row.map(model_to_changelist).transpose()
    }

    pub async fn upsert(&self, cl: &Changelist) -> Result<()> {
        let active = changelist_to_active_model(cl);
        match self.get(&cl.id).await? {
            Some(_) => {
                active.update(&self.db).await?;
            }
            None => {
                active.insert(&self.db).await?;
            }
        }
        Ok(())
    }

    /// Mark a changelist `Landed`, unless `legacy_mode` suppresses the
    /// write (§4.1 "unless configured in legacy mode, where status is
    /// not written").
    pub async fn mark_landed(&self, id: &str, legacy_mode: bool) -> Result<()> {
        if legacy_mode {
            return Ok(());
        }
        let Some(mut cl) = self.get(id).await? else {
            return Err(SchedulerError::NotFound(format!("changelist {id}")));
        };
        cl.status = ChangelistStatus::Landed;
        cl.last_ingested_data = Utc::now();
        self.upsert(&cl).await
    }
}

fn changelist_to_active_model(cl: &Changelist) -> changelist_entity::ActiveModel {
    changelist_entity::ActiveModel {
        id: Set(cl.id.clone()),
        system: Set(cl.system.clone()),
        status: Set(status_as_str(cl.status).to_string()),
        owner_email: Set(cl.owner_email.clone()),
        subject: Set(cl.subject.clone()),
        last_ingested_data: Set(cl.last_ingested_data),
        expectations_promoted: Set(cl.expectations_promoted),
    }
}

fn model_to_changelist(row: changelist_entity::Model) -> Result<Changelist> {
    Ok(Changelist {
        id: row.id,
        system: row.system,
        status: parse_status(&row.status)?,
        owner_email: row.owner_email,
        subject: row.subject,
        last_ingested_data: row.last_ingested_data,
        expectations_promoted: row.expectations_promoted,
    })
}

fn status_as_str(status: ChangelistStatus) -> &'static str {
    status.as_str()
}

fn parse_status(s: &str) -> Result<ChangelistStatus> {
    Ok(match s {
        "open" => ChangelistStatus::Open,
        "landed" => ChangelistStatus::Landed,
        "abandoned" => ChangelistStatus::Abandoned,
        other => return Err(SchedulerError::InvalidSpec(format!("unknown changelist status: {other}"))),
    })
}
