mod export;
mod help;
mod state;

use crate::backend::{HttpPipelineClient, PipelineApi};
use crate::cli::Cli;
use crate::model::{AgentRecord, AgentStatus, Phase, RunEvent};
use crate::orchestrator::{self, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{push_wrapped_status_kv, UiState, TAB_COUNT, TAB_DASHBOARD, TAB_DIGEST, TAB_HELP};
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(args: Cli) -> Result<()> {
    let cfg = crate::cli::build_config(&args);
    let api: Arc<dyn PipelineApi> = Arc::new(HttpPipelineClient::new(&cfg)?);
    let input = crate::cli::read_input(&args).await?;

    // Unbounded channels avoid backpressure between the UI thread and the runtime.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let initial_run = input
        .clone()
        .filter(|s| args.run_on_launch && !s.trim().is_empty());

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let launching = initial_run.is_some();
    let ui_handle = std::thread::spawn(move || {
        run_threaded(ui_args, input.unwrap_or_default(), launching, event_rx, cmd_tx)
    });

    let res = orchestrator::run_controller(api, &cfg, initial_run, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    args: Cli,
    input: String,
    launching: bool,
    mut event_rx: UnboundedReceiver<RunEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        input,
        save_path: args.save.clone(),
        ..Default::default()
    };
    if launching {
        state.begin_run();
    } else if state.input.trim().is_empty() {
        state.editing = true;
        state.info = "Paste or type content, Esc to finish, then r to run".into();
    }

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if (k.modifiers, k.code) == (KeyModifiers::CONTROL, KeyCode::Char('c')) {
                    let _ = cmd_tx.send(UiCommand::Quit);
                    break Ok(());
                }
                if state.editing {
                    handle_editor_key(&mut state, k);
                    continue;
                }
                if handle_key(&mut state, k, &cmd_tx) {
                    break Ok(());
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn handle_editor_key(state: &mut UiState, k: KeyEvent) {
    match k.code {
        KeyCode::Esc => state.editing = false,
        KeyCode::Enter => state.input.push('\n'),
        KeyCode::Tab => state.input.push('\t'),
        KeyCode::Backspace => {
            state.input.pop();
        }
        KeyCode::Char(c) => state.input.push(c),
        _ => {}
    }
}

/// Handle a key outside the editor. Returns true when the UI should quit.
fn handle_key(state: &mut UiState, k: KeyEvent, cmd_tx: &UnboundedSender<UiCommand>) -> bool {
    match k.code {
        KeyCode::Char('q') => {
            let _ = cmd_tx.send(UiCommand::Quit);
            return true;
        }
        KeyCode::Char('r') => {
            if state.input.trim().is_empty() {
                state.info = "Nothing to run; press e to enter content".into();
            } else {
                state.begin_run();
                let _ = cmd_tx.send(UiCommand::Start(state.input.clone()));
            }
        }
        KeyCode::Char('x') => {
            let _ = cmd_tx.send(UiCommand::Stop);
        }
        KeyCode::Char('e') => {
            if state.can_edit() {
                state.editing = true;
                state.tab = TAB_DASHBOARD;
            } else {
                state.info = "Input is locked while the pipeline runs (x to stop)".into();
            }
        }
        KeyCode::Char('s') => export::save_and_show_path(state),
        KeyCode::Char('y') => export::copy_digest(state),
        KeyCode::Tab => state.tab = (state.tab + 1) % TAB_COUNT,
        KeyCode::Char('?') => state.tab = TAB_HELP,
        KeyCode::Up | KeyCode::Char('k') if state.tab == TAB_DIGEST => state.scroll_digest(-1),
        KeyCode::Down | KeyCode::Char('j') if state.tab == TAB_DIGEST => state.scroll_digest(1),
        KeyCode::PageUp if state.tab == TAB_DIGEST => state.scroll_digest(-10),
        KeyCode::PageDown if state.tab == TAB_DIGEST => state.scroll_digest(10),
        _ => {}
    }
    false
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Dashboard"),
        Line::from("Digest"),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Multi-Agent Digest"),
    )
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        TAB_DASHBOARD => draw_dashboard(chunks[1], f, state),
        TAB_DIGEST => draw_digest(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }
}

fn status_color(status: AgentStatus) -> Color {
    match status {
        AgentStatus::Pending => Color::DarkGray,
        AgentStatus::Running => Color::Blue,
        AgentStatus::Done => Color::Green,
        AgentStatus::Error => Color::Red,
    }
}

fn status_icon(status: AgentStatus) -> &'static str {
    match status {
        AgentStatus::Pending => "○",
        AgentStatus::Running => "◌",
        AgentStatus::Done => "✓",
        AgentStatus::Error => "✕",
    }
}

fn stage_line(index: usize, agent: &AgentRecord) -> Line<'static> {
    let color = status_color(agent.status);
    let mut badge = Style::default().fg(color);
    if agent.status == AgentStatus::Running {
        badge = badge.add_modifier(Modifier::SLOW_BLINK);
    }
    Line::from(vec![
        Span::styled(format!(" {:>2}  ", index + 1), Style::default().fg(Color::DarkGray)),
        Span::styled(format!("{} ", status_icon(agent.status)), Style::default().fg(color)),
        Span::raw(format!("{:<14}", agent.display_name())),
        Span::styled(format!("[{}]", agent.status.label()), badge),
    ])
}

fn draw_dashboard(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let stage_rows = state.run.agents.len().max(1) as u16 + 2;
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Min(6),              // Input content
                Constraint::Length(stage_rows),  // Pipeline status
                Constraint::Length(7),           // Status row
            ]
            .as_ref(),
        )
        .split(area);

    let input_title = if state.editing {
        "Input Content (editing, Esc to finish)"
    } else {
        "Input Content"
    };
    let input_style = if state.can_edit() {
        Style::default()
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let mut input_text = state.input.clone();
    if state.editing {
        input_text.push('▏');
    }
    // Keep the cursor end of long input in view.
    let input_lines = input_text.lines().count() as u16;
    let visible = main[0].height.saturating_sub(2);
    let input = Paragraph::new(input_text)
        .style(input_style)
        .wrap(Wrap { trim: false })
        .scroll((input_lines.saturating_sub(visible), 0))
        .block(Block::default().borders(Borders::ALL).title(input_title));
    f.render_widget(input, main[0]);

    let stages: Vec<Line> = if state.run.agents.is_empty() {
        vec![Line::from(Span::styled(
            "  No run yet",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        state
            .run
            .agents
            .iter()
            .enumerate()
            .map(|(i, a)| stage_line(i, a))
            .collect()
    };
    let stages = Paragraph::new(stages).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Pipeline Status"),
    );
    f.render_widget(stages, main[1]);

    draw_status(main[2], f, state);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let (phase_text, phase_color) = match state.run.phase {
        Phase::Idle => ("Idle", Color::Gray),
        Phase::Submitting => ("Submitting…", Color::Yellow),
        Phase::Polling if state.polling_stopped => ("Stopped", Color::Gray),
        Phase::Polling => ("Running pipeline…", Color::Blue),
        Phase::Succeeded => ("Done", Color::Green),
        Phase::Failed => ("Failed", Color::Red),
    };

    let mut lines = vec![Line::from(vec![
        Span::styled("Phase:", Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(phase_text, Style::default().fg(phase_color)),
    ])];
    if let Some(started) = state.run_started {
        if state.is_busy() {
            lines.push(Line::from(vec![
                Span::styled("Elapsed:", Style::default().fg(Color::Gray)),
                Span::raw(format!(" {}s", started.elapsed().as_secs())),
            ]));
        }
    }
    if let Some(err) = state.run.last_error.as_deref() {
        push_wrapped_status_kv(&mut lines, "Error", err, area.width, Style::default().fg(Color::Red));
    }
    push_wrapped_status_kv(&mut lines, "Info", &state.info, area.width, Style::default());
    if let Some(path) = state.last_saved_path.as_ref() {
        push_wrapped_status_kv(
            &mut lines,
            "Saved",
            &path.display().to_string(),
            area.width,
            Style::default(),
        );
    }

    let p = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Status (r run, x stop, e edit, ? help)"),
    );
    f.render_widget(p, area);
}

fn draw_digest(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let title = format!("{} (s save, y copy, ↑/↓ scroll)", state.digest_title());
    let body = if state.run.output_text.is_empty() {
        Paragraph::new(Span::styled(
            "No digest yet",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Paragraph::new(state.run.output_text.as_str())
            .wrap(Wrap { trim: false })
            .scroll((state.digest_scroll, 0))
    };
    f.render_widget(
        body.block(Block::default().borders(Borders::ALL).title(title)),
        area,
    );
}
