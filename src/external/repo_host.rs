//! Repo host external collaborator (§6): read-only access to watched
//! git repositories. `Log` is most-recent-first; `LogFirstParent`
//! returns the first-parent path newest-first and excludes the `from`
//! endpoint (the walk is exclusive of `from`, inclusive of `to`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::errors::Result;

/// A single ref entry as returned by `Log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRef {
    pub git_hash: String,
}

/// A fully-resolved commit as returned by `LogFirstParent`.
#[derive(Debug, Clone, PartialEq)]
pub struct LongCommit {
    pub git_hash: String,
    pub author_email: String,
    pub commit_time: DateTime<Utc>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Most-recent-first log of `branch`, capped at `limit` entries.
    async fn log(&self, repo: &str, branch: &str, limit: usize) -> Result<Vec<CommitRef>>;

    /// First-parent path from `from` (exclusive) to `to` (inclusive),
    /// newest-first.
    async fn log_first_parent(
        &self,
        repo: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<LongCommit>>;

    /// Fetch a file's bytes at a given revision (used to load
    /// `tasks.json`).
    async fn get_file(&self, repo: &str, path: &str, revision: &str) -> Result<Vec<u8>>;
}

/// HTTP-backed implementation speaking to a Gitiles-style JSON log API.
///
/// Per-request timeout defaults to 10 seconds with 2xx-only enforcement
/// (§5 Timeouts).
pub struct HttpRepoHost {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRepoHost {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self { client, base_url: base_url.into() })
    }
}

#[derive(Debug, Deserialize)]
struct LogResponseEntry {
    hash: String,
    author_email: Option<String>,
    commit_time: Option<DateTime<Utc>>,
    subject: Option<String>,
    body: Option<String>,
}

#[async_trait]
impl RepoHost for HttpRepoHost {
    async fn log(&self, repo: &str, branch: &str, limit: usize) -> Result<Vec<CommitRef>> {
        let url = format!("{}/{repo}/+log/{branch}?n={limit}", self.base_url);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let entries: Vec<LogResponseEntry> = resp.json().await?;
        Ok(entries.into_iter().map(|e| CommitRef { git_hash: e.hash }).collect())
    }

    async fn log_first_parent(
        &self,
        repo: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<LongCommit>> {
        let url = format!("{}/{repo}/+log/{from}..{to}?first-parent=1", self.base_url);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let entries: Vec<LogResponseEntry> = resp.json().await?;
        Ok(entries
            .into_iter()
            .map(|e| LongCommit {
                git_hash: e.hash,
                author_email: e.author_email.unwrap_or_default(),
                commit_time: e.commit_time.unwrap_or_else(Utc::now),
                subject: e.subject.unwrap_or_default(),
                body: e.body.unwrap_or_default(),
            })
            .collect())
    }

    async fn get_file(&self, repo: &str, path: &str, revision: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{repo}/+/{revision}/{path}?format=TEXT", self.base_url);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}
