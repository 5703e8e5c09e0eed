//! Farm API external collaborator (§6): the task-execution service.
//! Per-request timeout defaults to 1 minute, overall dial timeout to 3
//! minutes (§5 Timeouts).

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

#[derive(Debug, Clone, Serialize)]
pub struct TriggerTaskRequest<'a> {
    pub name: &'a str,
    pub cmd: &'a [String],
    pub dimensions: &'a HashSet<String>,
    pub priority: f64,
    pub expiration: Duration,
    pub execution_timeout: Duration,
    pub pubsub_topic: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FarmOutcome {
    Success,
    Failure,
    Mishap,
    Pending,
    Running,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FarmTaskResult {
    pub farm_task_id: String,
    pub outcome: FarmOutcome,
    pub isolated_output: Option<String>,
}

#[async_trait]
pub trait FarmApi: Send + Sync {
    async fn trigger_task(&self, req: TriggerTaskRequest<'_>) -> Result<String>;
    async fn cancel_task(&self, farm_task_id: &str) -> Result<()>;
    async fn get_task(&self, farm_task_id: &str, with_performance_stats: bool) -> Result<FarmTaskResult>;
}

pub struct HttpFarmApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFarmApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(180))
            .build()?;
        Ok(Self { client, base_url: base_url.into() })
    }
}

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    task_id: String,
}

#[async_trait]
impl FarmApi for HttpFarmApi {
    async fn trigger_task(&self, req: TriggerTaskRequest<'_>) -> Result<String> {
        let url = format!("{}/tasks/new", self.base_url);
        let resp = self.client.post(&url).json(&req).send().await?.error_for_status()?;
        let body: TriggerResponse = resp.json().await?;
        Ok(body.task_id)
    }

    async fn cancel_task(&self, farm_task_id: &str) -> Result<()> {
        let url = format!("{}/tasks/{farm_task_id}/cancel", self.base_url);
        self.client.post(&url).send().await?.error_for_status()?;
        Ok(())
    }

    async fn get_task(&self, farm_task_id: &str, with_performance_stats: bool) -> Result<FarmTaskResult> {
        let url = format!(
            "{}/tasks/{farm_task_id}/result?perf={with_performance_stats}",
            self.base_url
        );
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }
}
