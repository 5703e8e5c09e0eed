//! File processors (§4.7): one per branch kind, selected by path before
//! the file is even fetched. `PrimaryBranchProcessor` is always present;
//! `TryjobProcessor` is wired in only when try-job ingestion is enabled.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::Result;
use crate::model::changelist::Changelist;
use crate::model::expectation::{ExpectationDelta, ExpectationRecord};
use crate::store::{ChangelistStore, ExpectationStore};

/// Wire format for one ingested result file: a batch of triage deltas
/// plus the authoring user/time, matching
/// [`crate::model::expectation::ExpectationRecord`] minus its id and
/// `cl_id` (the route supplies `cl_id`, not the file).
#[derive(Debug, Clone, Deserialize)]
pub struct ResultFile {
    pub user: String,
    pub triage_time: DateTime<Utc>,
    pub deltas: Vec<ExpectationDelta>,
}

/// A branch-specific handler in the processor registry (§4.7 "Route by
/// the per-branch Processor registry").
#[async_trait]
pub trait FileProcessor: Send + Sync {
    fn handles_file(&self, name: &str) -> bool;
    async fn process(&self, name: &str, data: &[u8], now: DateTime<Utc>) -> Result<()>;
}

/// Handles every `.json` result file not under a `/tryjob/` path
/// segment: writes straight to the primary-branch `Expectations` view.
pub struct PrimaryBranchProcessor {
    expectations: Arc<ExpectationStore>,
}

impl PrimaryBranchProcessor {
    pub fn new(expectations: Arc<ExpectationStore>) -> Self {
        Self { expectations }
    }
}

#[async_trait]
impl FileProcessor for PrimaryBranchProcessor {
    fn handles_file(&self, name: &str) -> bool {
        !name.contains("/tryjob/")
    }

    async fn process(&self, name: &str, data: &[u8], _now: DateTime<Utc>) -> Result<()> {
        let file: ResultFile = serde_json::from_slice(data)?;
        let num_changes = file.deltas.len() as u32;
        let record = ExpectationRecord {
            id: Uuid::now_v7(),
            cl_id: None,
            user: file.user,
            triage_time: file.triage_time,
            deltas: file.deltas,
            num_changes,
        };
        self.expectations.insert_record(&record).await?;
        tracing::debug!(file = %name, changes = num_changes, "primary-branch result ingested");
        Ok(())
    }
}

/// Handles every `.json` result file under a `/tryjob/<cl_id>/` path
/// segment: writes changelist-scoped `ExpectationRecord`s, lazily
/// touching the `Changelist` row (created at try-job intake time; a
/// miss here just means this is the first result seen for the CL).
pub struct TryjobProcessor {
    expectations: Arc<ExpectationStore>,
    changelists: Arc<ChangelistStore>,
}

impl TryjobProcessor {
    pub fn new(expectations: Arc<ExpectationStore>, changelists: Arc<ChangelistStore>) -> Self {
        Self { expectations, changelists }
    }

    fn cl_id_from_path(name: &str) -> Option<&str> {
        let after = name.strip_prefix("tryjob/").or_else(|| name.split("/tryjob/").nth(1))?;
        after.split('/').next().filter(|s| !s.is_empty())
    }
}

#[async_trait]
impl FileProcessor for TryjobProcessor {
    fn handles_file(&self, name: &str) -> bool {
        name.contains("/tryjob/") || name.starts_with("tryjob/")
    }

    async fn process(&self, name: &str, data: &[u8], now: DateTime<Utc>) -> Result<()> {
        let cl_id = Self::cl_id_from_path(name)
            .ok_or_else(|| crate::errors::SchedulerError::InvalidSpec(format!("cannot recover cl_id from path: {name}")))?;

        match self.changelists.get(cl_id).await? {
            Some(mut cl) => {
                cl.last_ingested_data = now;
                self.changelists.upsert(&cl).await?;
            }
            None => {
                if let Some((system, external_id)) = Changelist::split_id(cl_id) {
                    self.changelists.upsert(&Changelist::new(system, external_id)).await?;
                }
            }
        }

        let file: ResultFile = serde_json::from_slice(data)?;
        let num_changes = file.deltas.len() as u32;
        let record = ExpectationRecord {
            id: Uuid::now_v7(),
            cl_id: Some(cl_id.to_string()),
            user: file.user,
            triage_time: file.triage_time,
            deltas: file.deltas,
            num_changes,
        };
        self.expectations.insert_record(&record).await?;
        tracing::debug!(file = %name, cl_id, changes = num_changes, "tryjob result ingested");
        Ok(())
    }
}
