use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stage identifiers in execution order.
pub const KNOWN_STAGES: [&str; 4] = ["ingestor", "summarizer", "prioritizer", "formatter"];

/// Message stored when the backend reports a failed stage.
pub const STAGE_FAILURE_MESSAGE: &str = "One or more agents failed. Check Docker logs for details.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            poll_interval: Duration::from_millis(1500),
            request_timeout: Duration::from_secs(10),
            user_agent: format!("digest-pipeline-cli/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl AgentStatus {
    pub fn label(self) -> &'static str {
        match self {
            AgentStatus::Pending => "Pending",
            AgentStatus::Running => "Running…",
            AgentStatus::Done => "Done",
            AgentStatus::Error => "Error",
        }
    }
}

/// One pipeline stage as reported by `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    #[serde(rename = "agent")]
    pub name: String,
    pub status: AgentStatus,
}

impl AgentRecord {
    pub fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: AgentStatus::Pending,
        }
    }

    /// Display label for known stages; unknown identifiers are shown as-is.
    pub fn display_name(&self) -> &str {
        match self.name.as_str() {
            "ingestor" => "Ingestor",
            "summarizer" => "Summarizer",
            "prioritizer" => "Prioritizer",
            "formatter" => "Formatter",
            other => other,
        }
    }
}

/// Seed list used when a run is submitted, before the first status poll lands.
pub fn seed_agents() -> Vec<AgentRecord> {
    KNOWN_STAGES.iter().map(|s| AgentRecord::pending(s)).collect()
}

/// Body of `GET /output`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub ready: bool,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Submitting,
    Polling,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_busy(self) -> bool {
        matches!(self, Phase::Submitting | Phase::Polling)
    }
}

/// Read-only copy of the live run, handed to presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub phase: Phase,
    pub input_text: String,
    pub agents: Vec<AgentRecord>,
    pub output_text: String,
    pub last_error: Option<String>,
}

impl Default for RunSnapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            input_text: String::new(),
            agents: Vec::new(),
            output_text: String::new(),
            last_error: None,
        }
    }
}

impl RunSnapshot {
    /// True once every stage reports `done`.
    pub fn pipeline_done(&self) -> bool {
        !self.agents.is_empty() && self.agents.iter().all(|a| a.status == AgentStatus::Done)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    /// Emitted after every state change of the live run.
    Updated {
        // Boxed to keep the enum small; snapshots carry the whole digest.
        snapshot: Box<RunSnapshot>,
    },
    Info(InfoEvent),
}

/// Structured info events consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    BackendUnreachable { base_url: String },
    Submitted,
    Stopped,
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::BackendUnreachable { base_url } => {
                format!("Backend at {} is not responding yet", base_url)
            }
            InfoEvent::Submitted => "Pipeline started, polling for progress…".to_string(),
            InfoEvent::Stopped => "Polling stopped".to_string(),
        }
    }
}
