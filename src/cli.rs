use crate::backend::{HttpPipelineClient, PipelineApi};
use crate::model::{Phase, RunConfig};
use crate::orchestrator::{check_backend, RunController};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "digest-pipeline-cli",
    version,
    about = "Run the multi-agent digest pipeline and watch its progress, with optional TUI"
)]
pub struct Cli {
    /// Base URL of the pipeline API
    #[arg(long, default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Interval between status polls
    #[arg(long, default_value = "1500ms", value_parser = parse_poll_interval)]
    pub poll_interval: humantime::Duration,

    /// Timeout for each HTTP request
    #[arg(long, default_value = "10s")]
    pub request_timeout: humantime::Duration,

    /// Content to digest
    #[arg(long, conflicts_with = "input")]
    pub content: Option<String>,

    /// Read content to digest from a file ("-" for stdin)
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Print the final run as JSON and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print progress and the digest as text and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Export the final run as JSON to this file
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Save the finished digest to this file
    #[arg(long)]
    pub save: Option<PathBuf>,

    /// Write logs to this file (RUST_LOG controls the level)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Automatically start a run when the TUI launches with content
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub run_on_launch: bool,
}

fn parse_poll_interval(s: &str) -> std::result::Result<humantime::Duration, String> {
    let d: humantime::Duration = s.parse().map_err(|e| format!("{e}"))?;
    if Duration::from(d).is_zero() {
        return Err("poll interval must be greater than zero".to_string());
    }
    Ok(d)
}

impl Cli {
    pub fn is_headless(&self) -> bool {
        self.json || self.text || !cfg!(feature = "tui")
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if !args.is_headless() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
    }

    run_headless(args).await
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        base_url: args.base_url.clone(),
        poll_interval: Duration::from(args.poll_interval),
        request_timeout: Duration::from(args.request_timeout),
        ..Default::default()
    }
}

/// Resolve the content to digest from `--content` or `--input`.
pub async fn read_input(args: &Cli) -> Result<Option<String>> {
    if let Some(content) = args.content.as_ref() {
        return Ok(Some(content.clone()));
    }
    let Some(path) = args.input.as_deref() else {
        return Ok(None);
    };
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("read content from stdin")?;
        return Ok(Some(buf));
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read content from {}", path.display()))?;
    Ok(Some(content))
}

/// Poll until the run settles or Ctrl-C, printing stage changes to stderr when verbose.
async fn follow_run(
    controller: &mut RunController,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
    verbose: bool,
) {
    let mut prev = Vec::new();
    if verbose && controller.phase() == Phase::Polling {
        let _ = out_tx.send(OutputLine::Stderr("== Pipeline started ==".into()));
        for line in crate::text_summary::stage_lines(&controller.snapshot().agents) {
            let _ = out_tx.send(OutputLine::Stderr(line));
        }
        prev = controller.snapshot().agents;
    }

    while controller.is_polling() {
        tokio::select! {
            report = controller.next_tick() => {
                let Some(report) = report else { break };
                controller.on_tick(report);
                let agents = controller.snapshot().agents;
                // The settling tick reports its stage changes too.
                if verbose {
                    for line in crate::text_summary::changed_stage_lines(&prev, &agents) {
                        let _ = out_tx.send(OutputLine::Stderr(line));
                    }
                }
                prev = agents;
            }
            _ = tokio::signal::ctrl_c() => {
                controller.stop();
                let _ = out_tx.send(OutputLine::Stderr("Interrupted; polling stopped".into()));
            }
        }
    }
}

/// Run one pipeline to completion without a TUI, in text or JSON mode.
async fn run_headless(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    tracing::debug!(?cfg, "headless run");
    let input = read_input(&args)
        .await?
        .context("no content given; pass --content or --input")?;
    let api: Arc<dyn PipelineApi> = Arc::new(HttpPipelineClient::new(&cfg)?);
    let (out_tx, out_handle) = spawn_output_writer();
    let verbose = !args.json;

    if !check_backend(api.as_ref(), &cfg, None).await && verbose {
        let _ = out_tx.send(OutputLine::Stderr(format!(
            "Backend at {} is not responding yet; submitting anyway",
            cfg.base_url
        )));
    }

    let mut controller = RunController::new(api, cfg.poll_interval);
    controller.start(&input).await?;
    follow_run(&mut controller, &out_tx, verbose).await;

    let snapshot = controller.snapshot();
    if args.json {
        let out = serde_json::to_string_pretty(&snapshot)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        let summary = crate::text_summary::build_text_summary(&snapshot);
        for line in summary.status_lines {
            let _ = out_tx.send(OutputLine::Stderr(line));
        }
        if let Some(body) = summary.body {
            let _ = out_tx.send(OutputLine::Stdout(body));
        }
    }

    let mut save_result = match args.export_json.as_deref() {
        Some(path) => crate::storage::export_json(path, &snapshot),
        None => Ok(()),
    };
    if let Some(path) = args.save.as_deref() {
        if save_result.is_ok() && snapshot.phase == Phase::Succeeded {
            save_result = crate::storage::export_digest(path, &snapshot.output_text).map(|p| {
                if verbose {
                    let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
                }
            });
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    save_result?;

    match snapshot.phase {
        Phase::Succeeded => Ok(()),
        Phase::Failed => Err(anyhow::anyhow!(
            "{}",
            snapshot
                .last_error
                .unwrap_or_else(|| "pipeline failed".to_string())
        )),
        _ => Err(anyhow::anyhow!("pipeline did not finish")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::model::{AgentRecord, AgentStatus, PipelineOutput, KNOWN_STAGES};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend whose stages are running on the first poll and done on the second.
    #[derive(Default)]
    struct TwoPollBackend {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl PipelineApi for TwoPollBackend {
        async fn submit(&self, _content: &str) -> Result<(), ApiError> {
            Ok(())
        }

        async fn fetch_status(&self) -> Result<Vec<AgentRecord>, ApiError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            let status = if n >= 2 {
                AgentStatus::Done
            } else {
                AgentStatus::Running
            };
            Ok(KNOWN_STAGES
                .iter()
                .map(|name| AgentRecord {
                    name: name.to_string(),
                    status,
                })
                .collect())
        }

        async fn fetch_output(&self) -> Result<PipelineOutput, ApiError> {
            // Status is fetched first within a poll, so this sees the current poll count.
            let ready = self.polls.load(Ordering::SeqCst) >= 2;
            Ok(PipelineOutput {
                ready,
                content: if ready { "# Digest".into() } else { String::new() },
            })
        }

        async fn health(&self) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn stderr_lines(rx: &mut mpsc::UnboundedReceiver<OutputLine>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            if let OutputLine::Stderr(msg) = line {
                lines.push(msg);
            }
        }
        lines
    }

    #[test]
    fn defaults_match_backend_contract() {
        let args = Cli::parse_from(["digest-pipeline-cli"]);
        let cfg = build_config(&args);
        assert_eq!(cfg.base_url, "http://localhost:8000");
        assert_eq!(cfg.poll_interval, Duration::from_millis(1500));
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
        assert!(cfg.user_agent.starts_with("digest-pipeline-cli/"));
    }

    #[test]
    fn durations_accept_humantime() {
        let args = Cli::parse_from([
            "digest-pipeline-cli",
            "--poll-interval",
            "2s",
            "--request-timeout",
            "750ms",
            "--text",
        ]);
        let cfg = build_config(&args);
        assert_eq!(cfg.poll_interval, Duration::from_secs(2));
        assert_eq!(cfg.request_timeout, Duration::from_millis(750));
        assert!(args.is_headless());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        for value in ["0s", "0ms"] {
            let res = Cli::try_parse_from(["digest-pipeline-cli", "--poll-interval", value]);
            assert!(res.is_err(), "{value} should be rejected");
        }
        let args = Cli::parse_from(["digest-pipeline-cli", "--poll-interval", "1ms"]);
        assert_eq!(build_config(&args).poll_interval, Duration::from_millis(1));
    }

    #[test]
    fn content_and_input_conflict() {
        let res = Cli::try_parse_from([
            "digest-pipeline-cli",
            "--content",
            "hello",
            "--input",
            "notes.txt",
        ]);
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn reads_content_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "meeting notes").unwrap();

        let args = Cli::parse_from([
            "digest-pipeline-cli",
            "--input",
            path.to_str().unwrap(),
        ]);
        assert_eq!(read_input(&args).await.unwrap().as_deref(), Some("meeting notes"));

        let args = Cli::parse_from(["digest-pipeline-cli", "--content", "inline"]);
        assert_eq!(read_input(&args).await.unwrap().as_deref(), Some("inline"));

        let args = Cli::parse_from(["digest-pipeline-cli"]);
        assert_eq!(read_input(&args).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn text_mode_prints_stage_changes_of_the_settling_tick() {
        let api: Arc<dyn PipelineApi> = Arc::new(TwoPollBackend::default());
        let mut controller = RunController::new(api, Duration::from_millis(100));
        controller.start("hello").await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        follow_run(&mut controller, &tx, true).await;
        assert_eq!(controller.phase(), Phase::Succeeded);

        let lines = stderr_lines(&mut rx);
        let done: Vec<&String> = lines.iter().filter(|l| l.ends_with("Done")).collect();
        assert_eq!(done.len(), KNOWN_STAGES.len(), "{lines:?}");
        assert!(lines.iter().any(|l| l.ends_with("Running…")));
    }

    #[tokio::test(start_paused = true)]
    async fn json_mode_prints_no_progress() {
        let api: Arc<dyn PipelineApi> = Arc::new(TwoPollBackend::default());
        let mut controller = RunController::new(api, Duration::from_millis(100));
        controller.start("hello").await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        follow_run(&mut controller, &tx, false).await;
        assert_eq!(controller.phase(), Phase::Succeeded);
        assert!(stderr_lines(&mut rx).is_empty());
    }
}
