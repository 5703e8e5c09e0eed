//! Review system external collaborator (§6, C6): a Gerrit-like code
//! review service. Default HTTP timeout of 10 seconds with 2xx-only
//! enforcement (§5 Timeouts).

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::Result;

/// A pending try-job request pulled from the review system, already
/// resolved to the patchset it targets.
#[derive(Debug, Clone, Deserialize)]
pub struct TryJobRequest {
    pub system: String,
    pub external_cl_id: String,
    pub patch: String,
    pub base_revision: String,
}

#[async_trait]
pub trait ReviewSystem: Send + Sync {
    /// Pending try-jobs filtered by `bucket`.
    async fn pending_tryjobs(&self, bucket: &str) -> Result<Vec<TryJobRequest>>;
}

pub struct HttpReviewSystem {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReviewSystem {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self { client, base_url: base_url.into() })
    }
}

#[async_trait]
impl ReviewSystem for HttpReviewSystem {
    async fn pending_tryjobs(&self, bucket: &str) -> Result<Vec<TryJobRequest>> {
        let url = format!("{}/buildbucket/pending?bucket={bucket}", self.base_url);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }
}
