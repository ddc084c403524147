use crate::core::scheduler::{GpuView, LogTail};
use crate::core::task::{SubmitRequest, Task, TaskSummary};
use anyhow::{Context, Result};
use reqwest::{Client as ReqwestClient, Response};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub pid: u32,
}

/// HTTP client for the daemon's `/api` surface.
#[derive(Debug, Clone)]
pub struct Client {
    client: ReqwestClient,
    base_url: String,
}

impl Client {
    pub fn build(config: &crate::config::Config) -> Result<Self> {
        let host = &config.daemon.host;
        let port = config.daemon.port;
        let base_url = format!("http://{host}:{port}/api");
        let client = ReqwestClient::new();
        Ok(Self { client, base_url })
    }

    /// Surface the server's `{"error": ...}` body on non-2xx responses.
    async fn checked(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| status.to_string());
        anyhow::bail!("{message}")
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .context("Failed to reach the scheduler daemon")?;
        Self::checked(response)
            .await?
            .json()
            .await
            .context("Failed to parse health response")
    }

    pub async fn submit_task(&self, request: &SubmitRequest) -> Result<Task> {
        let response = self
            .client
            .post(format!("{}/tasks", self.base_url))
            .json(request)
            .send()
            .await
            .context("Failed to send task submission")?;
        Self::checked(response)
            .await?
            .json()
            .await
            .context("Failed to parse submitted task")
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskSummary>> {
        let response = self
            .client
            .get(format!("{}/tasks", self.base_url))
            .send()
            .await
            .context("Failed to send task list request")?;
        Self::checked(response)
            .await?
            .json()
            .await
            .context("Failed to parse task list")
    }

    pub async fn get_task(&self, id: i64) -> Result<Task> {
        let response = self
            .client
            .get(format!("{}/tasks/{id}", self.base_url))
            .send()
            .await
            .context("Failed to send task request")?;
        Self::checked(response)
            .await?
            .json()
            .await
            .context("Failed to parse task")
    }

    pub async fn task_logs(&self, id: i64, tail: Option<usize>) -> Result<LogTail> {
        let mut request = self.client.get(format!("{}/tasks/{id}/logs", self.base_url));
        if let Some(tail) = tail {
            request = request.query(&[("tail", tail)]);
        }
        let response = request.send().await.context("Failed to send log request")?;
        Self::checked(response)
            .await?
            .json()
            .await
            .context("Failed to parse log tail")
    }

    pub async fn cancel_task(&self, id: i64) -> Result<Task> {
        let response = self
            .client
            .post(format!("{}/tasks/{id}/cancel", self.base_url))
            .send()
            .await
            .context("Failed to send cancel request")?;
        Self::checked(response)
            .await?
            .json()
            .await
            .context("Failed to parse cancelled task")
    }

    pub async fn gpu_status(&self) -> Result<Vec<GpuView>> {
        let response = self
            .client
            .get(format!("{}/gpus", self.base_url))
            .send()
            .await
            .context("Failed to send GPU status request")?;
        Self::checked(response)
            .await?
            .json()
            .await
            .context("Failed to parse GPU status")
    }
}
