//! Access to the remote digest pipeline.
//!
//! The controller only sees the [`PipelineApi`] trait so tests can script backend
//! responses without a server.

mod http;

pub use http::HttpPipelineClient;

use crate::error::ApiError;
use crate::model::{AgentRecord, PipelineOutput};
use async_trait::async_trait;

#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// `POST /run`; any 2xx counts as started.
    async fn submit(&self, content: &str) -> Result<(), ApiError>;

    /// `GET /status`, ordered by execution order.
    async fn fetch_status(&self) -> Result<Vec<AgentRecord>, ApiError>;

    /// `GET /output`.
    async fn fetch_output(&self) -> Result<PipelineOutput, ApiError>;

    /// `GET /health`.
    async fn health(&self) -> Result<(), ApiError>;
}
