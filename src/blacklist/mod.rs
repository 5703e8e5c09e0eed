//! Blacklist (§4.4, C4): a matcher over `(task-spec pattern × commit
//! set)` preventing scheduling.
//!
//! Rule add/remove are authoritative and synchronous; readers see a
//! consistent snapshot via a coarse-grained read lock (§5
//! "Shared-resource policy": "the blacklist cache (read-write lock;
//! readers block writers only during rule mutation)").

use std::collections::HashSet;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::Result;
use crate::external::RepoHost;
use crate::model::blacklist::BlacklistRule;

pub struct Blacklist {
    rules: RwLock<Vec<BlacklistRule>>,
}

impl Default for Blacklist {
    fn default() -> Self {
        Self { rules: RwLock::new(Vec::new()) }
    }
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// `IsBlacklisted(repo, revision, taskSpecName) -> (bool, reasonID)`
    /// (§4.4). `git_hash` is the commit's git hash at `revision`;
    /// blacklist rules key on hash, not on the dense commit id.
    pub async fn is_blacklisted(&self, git_hash: &str, task_spec_name: &str) -> Result<(bool, Option<Uuid>)> {
        let rules = self.rules.read().await;
        for rule in rules.iter() {
            if rule.matches(git_hash, task_spec_name)? {
                return Ok((true, Some(rule.id)));
            }
        }
        Ok((false, None))
    }

    pub async fn add_rule(&self, rule: BlacklistRule) {
        self.rules.write().await.push(rule);
    }

    pub async fn remove_rule(&self, rule_id: Uuid) {
        self.rules.write().await.retain(|r| r.id != rule_id);
    }

    pub async fn list_rules(&self) -> Vec<BlacklistRule> {
        self.rules.read().await.clone()
    }

    /// `NewCommitRangeRule(from, to)` (§4.4): materialize the commit
    /// set for a rule by walking the repo graph once at creation time;
    /// the set is stored, not recomputed on every query.
    pub async fn new_commit_range_rule(
        &self,
        repo_host: &impl RepoHost,
        repo: &str,
        from: &str,
        to: &str,
        name: impl Into<String>,
        added_by: impl Into<String>,
        description: impl Into<String>,
        task_spec_patterns: Vec<String>,
    ) -> Result<BlacklistRule> {
        let mut rule = BlacklistRule::new(name, added_by, description, task_spec_patterns)?;
        let commits: HashSet<String> = repo_host
            .log_first_parent(repo, from, to)
            .await?
            .into_iter()
            .map(|c| c.git_hash)
            .collect();
        rule.commits = commits;
        Ok(rule)
    }
}
