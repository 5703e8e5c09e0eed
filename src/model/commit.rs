//! Commit and dense commit-ID model (§3, §4.1).
//!
//! A [`CommitId`] is a zero-padded, fixed-width, lexicographically
//! ordered identifier distinct from the git hash. Per repository the
//! counter starts at `1` for the oldest stored commit; the configured
//! `initialCommit` is the implicit, unstored anchor at counter `0`.
//! Because the counter is left-zero-padded to a fixed width,
//! string-lexicographic order coincides with numeric order.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Width of the zero-padded counter portion of a [`CommitId`].
const COUNTER_WIDTH: usize = 9;

/// Dense, fixed-width, lexicographically-ordered commit identifier.
///
/// Rendered as `<prefix><counter>` where `prefix` is a short per-repo
/// family code (e.g. `"001"`) and `counter` is a decimal integer
/// zero-padded to [`COUNTER_WIDTH`] digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitId(String);

impl CommitId {
    /// Build a `CommitId` from a repo-family prefix and a 1-based
    /// counter.
    pub fn new(prefix: &str, counter: u64) -> Self {
        CommitId(format!("{prefix}{counter:0width$}", width = COUNTER_WIDTH))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the integer counter from the rendered string, stripping
    /// the configured prefix. Returns `None` if `self` doesn't carry
    /// `prefix` or the suffix isn't a valid integer.
    pub fn counter(&self, prefix: &str) -> Option<u64> {
        self.0.strip_prefix(prefix)?.parse().ok()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CommitId {
    fn from(s: String) -> Self {
        CommitId(s)
    }
}

/// A single commit observed on a watched repository's primary branch.
///
/// Commits are created once by the commit indexer (C1) on first
/// observation and are never mutated or deleted afterwards. Per
/// repository, `git_hash` and `commit_id` are each unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// 40-hex git object hash.
    pub git_hash: String,
    /// Dense commit id, see [`CommitId`]. Canonical ordering key —
    /// `commit_time` is not ordering-authoritative.
    pub commit_id: CommitId,
    pub commit_time: DateTime<Utc>,
    pub author_email: String,
    pub subject: String,
    pub body: String,
}

impl Commit {
    pub fn new(
        git_hash: impl Into<String>,
        commit_id: CommitId,
        commit_time: DateTime<Utc>,
        author_email: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            git_hash: git_hash.into(),
            commit_id,
            commit_time,
            author_email: author_email.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}
