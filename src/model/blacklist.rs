//! Blacklist rule model (§3, §4.4).

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::Result;

/// A matcher over `(task-spec pattern x commit set)` preventing
/// scheduling. `task_spec_patterns` are anchored, full-string regexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistRule {
    pub id: Uuid,
    pub name: String,
    pub added_by: String,
    pub description: String,
    pub task_spec_patterns: Vec<String>,
    pub commits: HashSet<String>,
}

impl BlacklistRule {
    pub fn new(
        name: impl Into<String>,
        added_by: impl Into<String>,
        description: impl Into<String>,
        task_spec_patterns: Vec<String>,
    ) -> Result<Self> {
        // Validate patterns compile up front so a bad rule fails fast at
        // creation rather than silently never matching at query time.
        for pattern in &task_spec_patterns {
            compiled_anchored(pattern)?;
        }
        Ok(Self {
            id: Uuid::now_v7(),
            name: name.into(),
            added_by: added_by.into(),
            description: description.into(),
            task_spec_patterns,
            commits: HashSet::new(),
        })
    }

    /// True iff `git_hash` is in this rule's commit set AND any pattern
    /// matches `task_spec_name` (anchored, full-string match).
    pub fn matches(&self, git_hash: &str, task_spec_name: &str) -> Result<bool> {
        if !self.commits.contains(git_hash) {
            return Ok(false);
        }
        for pattern in &self.task_spec_patterns {
            if compiled_anchored(pattern)?.is_match(task_spec_name) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Anchor a user-supplied pattern to require a full-string match, the
/// way a blacklist pattern is documented to behave (§4.4).
fn compiled_anchored(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^(?:{pattern})$"))?)
}
