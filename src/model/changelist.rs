//! Changelist model (§3).
//!
//! A `Changelist` represents a pending or landed code-review request
//! from an external review system (Gerrit-like). Its `id` is the
//! composite `"<system>_<external-id>"` so that changelists from
//! multiple review systems can share one table without collision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangelistStatus {
    Open,
    Landed,
    Abandoned,
}

impl ChangelistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangelistStatus::Open => "open",
            ChangelistStatus::Landed => "landed",
            ChangelistStatus::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changelist {
    /// `"<system>_<external-id>"`, e.g. `"gerrit_123456"`.
    pub id: String,
    pub system: String,
    pub status: ChangelistStatus,
    pub owner_email: String,
    pub subject: String,
    pub last_ingested_data: DateTime<Utc>,
    /// Set once this CL's changelist-scoped expectations have been
    /// folded into the primary branch (§8 invariant 6: replaying a
    /// landed commit must not insert a second promoted record).
    pub expectations_promoted: bool,
}

impl Changelist {
    pub fn new(system: impl Into<String>, external_id: impl AsRef<str>) -> Self {
        let system = system.into();
        let id = format!("{system}_{}", external_id.as_ref());
        Self {
            id,
            system,
            status: ChangelistStatus::Open,
            owner_email: String::new(),
            subject: String::new(),
            last_ingested_data: Utc::now(),
            expectations_promoted: false,
        }
    }

    /// Parse the `(system, external_id)` pair back out of a composite
    /// id. Returns `None` if the id has no `_` separator.
    pub fn split_id(id: &str) -> Option<(&str, &str)> {
        id.split_once('_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_id_round_trips() {
        let cl = Changelist::new("gerrit", "123456");
        assert_eq!(cl.id, "gerrit_123456");
        assert_eq!(Changelist::split_id(&cl.id), Some(("gerrit", "123456")));
    }
}
