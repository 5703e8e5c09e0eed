//! Gold-side expectation model (§3, §4.1 changelist-landing
//! reconciliation).
//!
//! Expectations are grouped by `(grouping_id, digest)` — the canonical
//! `(test, corpus)` pair paired with the image digest it labels.
//! Promotion from changelist-scoped to primary-branch expectations
//! applies the last-writer-wins delta per `(grouping_id, digest)`, with
//! `num_changes` reflecting only the net, non-cancelling changes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Positive,
    Negative,
    Untriaged,
}

/// One `(grouping_id, digest) -> label` assignment, the unit a single
/// triage action changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationDelta {
    pub grouping_id: String,
    pub digest: String,
    pub label: Label,
}

/// A batch of triage decisions made by `user` at `triage_time`, scoped
/// either to a changelist (`cl_id = Some(..)`) or to the primary branch
/// (`cl_id = None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectationRecord {
    pub id: Uuid,
    pub cl_id: Option<String>,
    pub user: String,
    pub triage_time: DateTime<Utc>,
    pub deltas: Vec<ExpectationDelta>,
    /// Count of non-zero final deltas only — pairs that undo each other
    /// collapse to zero contribution but are still counted once each,
    /// per §4.1.
    pub num_changes: u32,
}

/// Collapse a sequence of changelist-scoped records for one landed CL
/// into the net per-`(grouping_id, digest)` label and emit a single
/// primary-branch record. Idempotent: calling this twice with the same
/// input and `record_id` would only differ by ID (callers generate a
/// fresh ID so replay of an already-promoted commit is a harmless
/// no-op at the store layer, see `store::expectation_store`).
pub fn promote_to_primary(
    cl_records: &[ExpectationRecord],
    user: impl Into<String>,
    triage_time: DateTime<Utc>,
    record_id: Uuid,
) -> Option<ExpectationRecord> {
    let mut net: HashMap<(String, String), Label> = HashMap::new();
    for record in cl_records {
        for delta in &record.deltas {
            net.insert((delta.grouping_id.clone(), delta.digest.clone()), delta.label);
        }
    }

    if net.is_empty() {
        return None;
    }

    let deltas: Vec<ExpectationDelta> = net
        .into_iter()
        .map(|((grouping_id, digest), label)| ExpectationDelta { grouping_id, digest, label })
        .collect();
    let num_changes = deltas.len() as u32;

    Some(ExpectationRecord {
        id: record_id,
        cl_id: None,
        user: user.into(),
        triage_time,
        deltas,
        num_changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(label: Label) -> ExpectationDelta {
        ExpectationDelta { grouping_id: "test/corpus".into(), digest: "abc123".into(), label }
    }

    #[test]
    fn promotion_nets_repeated_triage_on_same_pair() {
        let now = Utc::now();
        let records = vec![
            ExpectationRecord {
                id: Uuid::now_v7(),
                cl_id: Some("gerrit_1".into()),
                user: "alice".into(),
                triage_time: now,
                deltas: vec![delta(Label::Negative)],
                num_changes: 1,
            },
            ExpectationRecord {
                id: Uuid::now_v7(),
                cl_id: Some("gerrit_1".into()),
                user: "alice".into(),
                triage_time: now,
                deltas: vec![delta(Label::Positive)],
                num_changes: 1,
            },
        ];

        let promoted = promote_to_primary(&records, "alice", now, Uuid::now_v7()).unwrap();
        // Last write wins: Positive survives, and it's still counted as
        // one net change even though two triage actions occurred.
        assert_eq!(promoted.num_changes, 1);
        assert_eq!(promoted.deltas[0].label, Label::Positive);
    }

    #[test]
    fn empty_input_promotes_to_nothing() {
        assert!(promote_to_primary(&[], "alice", Utc::now(), Uuid::now_v7()).is_none());
    }
}
