use super::PipelineApi;
use crate::error::ApiError;
use crate::model::{AgentRecord, PipelineOutput, RunConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Response, Url};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct RunRequest<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

#[derive(Deserialize)]
struct StatusBody {
    agents: Vec<AgentRecord>,
}

/// reqwest-backed client for the pipeline API.
#[derive(Clone)]
pub struct HttpPipelineClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpPipelineClient {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        // Url::join drops the last path segment unless the base ends with '/'.
        let mut base = cfg.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base).with_context(|| format!("invalid base URL {}", cfg.base_url))?;

        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .context("build http client")?;

        Ok(Self { http, base_url })
    }

    fn endpoint(&self, path: &str) -> Url {
        // Endpoint names are static and relative, so joining cannot fail.
        self.base_url
            .join(path)
            .unwrap_or_else(|_| self.base_url.clone())
    }

    async fn get(&self, path: &str) -> Result<Response, ApiError> {
        let resp = self
            .http
            .get(self.endpoint(path))
            .send()
            .await
            .map_err(ApiError::Transport)?;
        if !resp.status().is_success() {
            return Err(ApiError::Status {
                status: resp.status(),
                detail: None,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl PipelineApi for HttpPipelineClient {
    async fn submit(&self, content: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.endpoint("run"))
            .json(&RunRequest { content })
            .send()
            .await
            .map_err(ApiError::Transport)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        // Error bodies that are not JSON simply lose their detail.
        let detail = resp.json::<ErrorBody>().await.ok().and_then(|b| b.detail);
        Err(ApiError::Status { status, detail })
    }

    async fn fetch_status(&self) -> Result<Vec<AgentRecord>, ApiError> {
        let body: StatusBody = self
            .get("status")
            .await?
            .json()
            .await
            .map_err(ApiError::Decode)?;
        Ok(body.agents)
    }

    async fn fetch_output(&self) -> Result<PipelineOutput, ApiError> {
        self.get("output")
            .await?
            .json()
            .await
            .map_err(ApiError::Decode)
    }

    async fn health(&self) -> Result<(), ApiError> {
        self.get("health").await.map(|_| ())
    }
}
