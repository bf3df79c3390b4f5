//! Command loop between presentation layers and the run controller.

use super::controller::RunController;
use crate::backend::PipelineApi;
use crate::model::{InfoEvent, RunConfig, RunEvent};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Commands emitted by UI layers to control the live run.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Start(String),
    Stop,
    Quit,
}

/// Probe `GET /health` once; an unreachable backend only produces a warning.
pub(crate) async fn check_backend(
    api: &dyn PipelineApi,
    cfg: &RunConfig,
    event_tx: Option<&UnboundedSender<RunEvent>>,
) -> bool {
    match api.health().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(base_url = %cfg.base_url, error = %e, "backend health check failed");
            if let Some(tx) = event_tx {
                let _ = tx.send(RunEvent::Info(InfoEvent::BackendUnreachable {
                    base_url: cfg.base_url.clone(),
                }));
            }
            false
        }
    }
}

async fn start_run(
    controller: &mut RunController,
    event_tx: &UnboundedSender<RunEvent>,
    input: &str,
) {
    if let Err(e) = controller.start(input).await {
        let _ = event_tx.send(RunEvent::Info(InfoEvent::Message(format!("Cannot run: {e}"))));
    }
}

/// Drive runs based on UI commands and emit run events back to presentation layers.
///
/// Returns once the UI asks to quit or drops its command sender; polling is
/// stopped before returning so no timer outlives the view.
pub(crate) async fn run_controller(
    api: Arc<dyn PipelineApi>,
    cfg: &RunConfig,
    initial_input: Option<String>,
    event_tx: UnboundedSender<RunEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    check_backend(api.as_ref(), cfg, Some(&event_tx)).await;

    let mut controller = RunController::new(api, cfg.poll_interval).with_events(event_tx.clone());
    if let Some(input) = initial_input.as_deref() {
        start_run(&mut controller, &event_tx, input).await;
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Start(input)) => {
                        start_run(&mut controller, &event_tx, &input).await;
                    }
                    Some(UiCommand::Stop) => {
                        if controller.is_polling() {
                            controller.stop();
                            let _ = event_tx.send(RunEvent::Info(InfoEvent::Stopped));
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        controller.stop();
                        break;
                    }
                }
            }
            Some(report) = controller.next_tick() => {
                controller.on_tick(report);
            }
        }
    }

    Ok(())
}
