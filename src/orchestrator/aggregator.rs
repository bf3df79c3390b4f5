//! Reduction of one poll's raw signals to a single verdict.

use crate::model::{AgentRecord, AgentStatus, PipelineOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    InProgress,
    Succeeded,
    Failed,
}

/// Classify a status/output pair.
///
/// A ready, non-empty output wins over every agent status, including `error`:
/// per-agent statuses can lag behind the output file.
pub(crate) fn classify(agents: &[AgentRecord], output: &PipelineOutput) -> Verdict {
    if output.ready && !output.content.is_empty() {
        return Verdict::Succeeded;
    }
    if agents.iter().any(|a| a.status == AgentStatus::Error) {
        return Verdict::Failed;
    }
    Verdict::InProgress
}
