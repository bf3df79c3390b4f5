use crate::model::{InfoEvent, Phase, RunEvent, RunSnapshot};
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};
use std::path::PathBuf;
use std::time::Instant;

pub const TAB_DASHBOARD: usize = 0;
pub const TAB_DIGEST: usize = 1;
pub const TAB_HELP: usize = 2;
pub const TAB_COUNT: usize = 3;

#[derive(Default)]
pub struct UiState {
    pub tab: usize,
    pub info: String,
    /// Latest copy of the live run.
    pub run: RunSnapshot,
    pub run_started: Option<Instant>,
    /// Set once the user stops polling; cleared by the next run.
    pub polling_stopped: bool,

    // Input editor
    pub input: String,
    pub editing: bool,

    // Digest tab
    pub digest_scroll: u16,
    pub save_path: Option<PathBuf>,
    pub last_saved_path: Option<PathBuf>,
}

impl UiState {
    /// A run is in flight and its poll timer has not been stopped.
    pub fn is_busy(&self) -> bool {
        self.run.phase.is_busy() && !self.polling_stopped
    }

    pub fn can_edit(&self) -> bool {
        !self.is_busy()
    }

    /// Reset per-run UI state before a new submission.
    pub fn begin_run(&mut self) {
        self.polling_stopped = false;
        self.digest_scroll = 0;
        self.run_started = Some(Instant::now());
        self.tab = TAB_DASHBOARD;
    }

    pub fn digest_title(&self) -> &'static str {
        if self.run.pipeline_done() {
            "Your Daily Digest"
        } else {
            "Output"
        }
    }

    pub fn apply_event(&mut self, ev: RunEvent) {
        match ev {
            RunEvent::Updated { snapshot } => {
                let prev = self.run.phase;
                self.run = *snapshot;
                if prev != self.run.phase {
                    self.on_phase_change();
                }
            }
            RunEvent::Info(info) => {
                if matches!(info, InfoEvent::Stopped) {
                    self.polling_stopped = true;
                }
                self.info = info.to_message();
            }
        }
    }

    fn on_phase_change(&mut self) {
        match self.run.phase {
            Phase::Submitting => self.info = "Submitting…".into(),
            Phase::Succeeded => {
                self.info = "Digest ready (s to save, y to copy)".into();
                self.digest_scroll = 0;
                self.tab = TAB_DIGEST;
            }
            Phase::Failed => {
                self.info = self
                    .run
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "Pipeline failed".into());
            }
            Phase::Idle | Phase::Polling => {}
        }
    }

    pub fn scroll_digest(&mut self, delta: i32) {
        let max = self.run.output_text.lines().count().saturating_sub(1) as i32;
        let next = (self.digest_scroll as i32 + delta).clamp(0, max.max(0));
        self.digest_scroll = next as u16;
    }
}

pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    status_area_width: u16,
    value_style: Style,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Account for borders (2 chars on each side)
    let usable_width = status_area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let value_chars: Vec<char> = value.chars().collect();
    let mut remaining = value_chars.as_slice();
    let mut first = true;

    while !remaining.is_empty() {
        let line_width = if first {
            usable_width.saturating_sub(label_width + 1).max(1)
        } else {
            usable_width.saturating_sub(2).max(1)
        };

        let chars_to_take = (remaining.len() as u16).min(line_width) as usize;
        let (line_chars, rest) = remaining.split_at(chars_to_take);
        let line_text: String = line_chars.iter().collect();

        if first {
            out.push(Line::from(vec![
                Span::styled(label_text.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::styled(line_text, value_style),
            ]));
            first = false;
        } else {
            out.push(Line::from(vec![
                Span::raw("  "),
                Span::styled(line_text, value_style),
            ]));
        }

        remaining = rest;
    }
}
