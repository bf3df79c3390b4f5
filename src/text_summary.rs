//! Text rendering for headless CLI output.
//!
//! This module formats stage progress and the final run outcome as
//! human-readable lines for text mode.

use crate::model::{AgentRecord, Phase, RunSnapshot};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    /// Written to stderr.
    pub status_lines: Vec<String>,
    /// Written to stdout; the digest itself on success.
    pub body: Option<String>,
}

/// One numbered line per stage, e.g. `2. Summarizer      Running…`.
pub(crate) fn stage_lines(agents: &[AgentRecord]) -> Vec<String> {
    agents
        .iter()
        .enumerate()
        .map(|(i, a)| format!("{}. {:<14}{}", i + 1, a.display_name(), a.status.label()))
        .collect()
}

/// Lines for stages whose status differs from the previous snapshot.
pub(crate) fn changed_stage_lines(prev: &[AgentRecord], next: &[AgentRecord]) -> Vec<String> {
    stage_lines(next)
        .into_iter()
        .zip(next)
        .enumerate()
        .filter(|(i, (_, rec))| prev.get(*i) != Some(*rec))
        .map(|(_, (line, _))| line)
        .collect()
}

pub(crate) fn build_text_summary(snapshot: &RunSnapshot) -> TextSummary {
    let mut status_lines = Vec::new();

    match snapshot.phase {
        Phase::Succeeded => {
            let headline = if snapshot.pipeline_done() {
                "Your Daily Digest"
            } else {
                "Output"
            };
            status_lines.push(format!("== {headline} =="));
        }
        Phase::Failed => {
            status_lines.push("== Pipeline failed ==".to_string());
            status_lines.extend(stage_lines(&snapshot.agents));
            if let Some(err) = snapshot.last_error.as_deref() {
                status_lines.push(format!("Error: {err}"));
            }
        }
        phase => {
            status_lines.push(format!("== Stopped while {phase:?} =="));
            status_lines.extend(stage_lines(&snapshot.agents));
        }
    }

    let body = (snapshot.phase == Phase::Succeeded).then(|| snapshot.output_text.clone());
    TextSummary { status_lines, body }
}
