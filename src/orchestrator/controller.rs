//! Run lifecycle controller.
//!
//! Owns the single live run: submits it, polls it through the scheduler and
//! settles it into a terminal phase. All run state is mutated through
//! `&mut RunController`; timer and fetch tasks only report back over a channel.

use super::aggregator::{classify, Verdict};
use super::scheduler::{PollScheduler, ScheduleId};
use crate::backend::PipelineApi;
use crate::error::{ApiError, RunError, ValidationError};
use crate::model::{
    seed_agents, AgentRecord, AgentStatus, InfoEvent, Phase, PipelineOutput, RunEvent, RunSnapshot,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, trace, warn};

/// Result of one poll, tagged with the schedule that produced it.
pub(crate) struct TickReport {
    schedule: ScheduleId,
    result: Result<(Vec<AgentRecord>, PipelineOutput), ApiError>,
}

/// Fetch status and output concurrently and wait for both.
async fn poll_once(api: &dyn PipelineApi) -> Result<(Vec<AgentRecord>, PipelineOutput), ApiError> {
    let (agents, output) = tokio::join!(api.fetch_status(), api.fetch_output());
    Ok((agents?, output?))
}

pub(crate) struct RunController {
    api: Arc<dyn PipelineApi>,
    period: Duration,
    scheduler: PollScheduler,
    run: RunSnapshot,
    tick_tx: UnboundedSender<TickReport>,
    tick_rx: UnboundedReceiver<TickReport>,
    event_tx: Option<UnboundedSender<RunEvent>>,
}

impl RunController {
    pub fn new(api: Arc<dyn PipelineApi>, period: Duration) -> Self {
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        Self {
            api,
            period,
            scheduler: PollScheduler::new(),
            run: RunSnapshot::default(),
            tick_tx,
            tick_rx,
            event_tx: None,
        }
    }

    /// Publish a snapshot on `event_tx` after every state change.
    pub fn with_events(mut self, event_tx: UnboundedSender<RunEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.run.clone()
    }

    pub fn phase(&self) -> Phase {
        self.run.phase
    }

    pub fn is_polling(&self) -> bool {
        self.scheduler.is_active()
    }

    #[cfg(test)]
    pub fn active_schedules(&self) -> usize {
        self.scheduler.active_count()
    }

    /// Submit `input_text` as a new run, superseding any previous one.
    ///
    /// Only empty input is reported as an error; a rejected submission is a
    /// state transition to [`Phase::Failed`].
    pub async fn start(&mut self, input_text: &str) -> Result<(), ValidationError> {
        if input_text.trim().is_empty() {
            return Err(ValidationError);
        }

        self.stop();
        self.run = RunSnapshot {
            phase: Phase::Submitting,
            input_text: input_text.to_string(),
            agents: seed_agents(),
            output_text: String::new(),
            last_error: None,
        };
        self.publish();

        info!(bytes = input_text.len(), "submitting pipeline run");
        match self.api.submit(input_text).await {
            Ok(()) => {
                if self.schedule_polling() {
                    self.run.phase = Phase::Polling;
                    self.info(InfoEvent::Submitted);
                } else {
                    self.run.last_error = Some(RunError::ZeroPollInterval.to_string());
                    self.run.phase = Phase::Failed;
                }
            }
            Err(e) => {
                let err = RunError::submission(e);
                warn!(error = %err, cause = ?std::error::Error::source(&err), "pipeline submission failed");
                self.run.last_error = Some(err.to_string());
                self.run.phase = Phase::Failed;
            }
        }
        self.publish();
        Ok(())
    }

    /// Returns false when the poll timer could not be started.
    fn schedule_polling(&mut self) -> bool {
        let api = self.api.clone();
        let tick_tx = self.tick_tx.clone();
        let scheduled = self.scheduler.schedule(self.period, move |schedule| {
            let api = api.clone();
            let tick_tx = tick_tx.clone();
            async move {
                let result = poll_once(api.as_ref()).await;
                // The controller may already be gone; nothing left to report to.
                let _ = tick_tx.send(TickReport { schedule, result });
            }
        });
        scheduled.is_some()
    }

    /// Wait for the next poll result. Cancel safe.
    pub async fn next_tick(&mut self) -> Option<TickReport> {
        self.tick_rx.recv().await
    }

    /// Apply one poll result to the live run.
    pub fn on_tick(&mut self, report: TickReport) {
        if self.scheduler.active_id() != Some(report.schedule) || self.run.phase != Phase::Polling
        {
            trace!("discarding poll result from an inactive schedule");
            return;
        }

        let (agents, output) = match report.result {
            Ok(v) => v,
            Err(e) => {
                // The backend may not be up yet right after submission; try again next tick.
                debug!(error = %RunError::TransientPoll(e), "poll failed");
                return;
            }
        };

        self.run.agents = agents;
        match classify(&self.run.agents, &output) {
            Verdict::Succeeded => {
                self.run.output_text = output.content;
                self.run.phase = Phase::Succeeded;
                self.stop();
                info!(bytes = self.run.output_text.len(), "pipeline output ready");
            }
            Verdict::Failed => {
                self.run.last_error = Some(RunError::StageFailure.to_string());
                self.run.phase = Phase::Failed;
                self.stop();
                let failed: Vec<&str> = self
                    .run
                    .agents
                    .iter()
                    .filter(|a| a.status == AgentStatus::Error)
                    .map(|a| a.name.as_str())
                    .collect();
                warn!(stages = ?failed, "pipeline stage failed");
            }
            Verdict::InProgress => {}
        }
        self.publish();
    }

    /// Cancel polling. Idempotent; run state is left as is.
    pub fn stop(&mut self) {
        self.scheduler.cancel();
    }

    /// Poll until the run settles or polling is stopped, returning the final phase.
    pub async fn run_to_completion(&mut self) -> Phase {
        while self.scheduler.is_active() {
            match self.next_tick().await {
                Some(report) => self.on_tick(report),
                None => break,
            }
        }
        self.run.phase
    }

    fn publish(&self) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(RunEvent::Updated {
                snapshot: Box::new(self.run.clone()),
            });
        }
    }

    fn info(&self, info: InfoEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(RunEvent::Info(info));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{KNOWN_STAGES, STAGE_FAILURE_MESSAGE};
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time;

    const PERIOD: Duration = Duration::from_millis(1500);

    /// Replays queued responses; the last one repeats once the queue runs dry.
    struct Script<T: Clone> {
        queue: VecDeque<T>,
        last: T,
    }

    impl<T: Clone> Script<T> {
        fn next(&mut self) -> T {
            if let Some(v) = self.queue.pop_front() {
                self.last = v;
            }
            self.last.clone()
        }
    }

    type Reply<T> = Result<T, StatusCode>;

    struct FakeApi {
        submit: Reply<()>,
        submit_detail: Option<String>,
        status: Mutex<Script<Reply<Vec<AgentRecord>>>>,
        output: Mutex<Script<Reply<PipelineOutput>>>,
        submits: AtomicUsize,
        polls: AtomicUsize,
    }

    impl FakeApi {
        fn accepting() -> Self {
            Self {
                submit: Ok(()),
                submit_detail: None,
                status: Mutex::new(Script {
                    queue: VecDeque::new(),
                    last: Ok(seed_agents()),
                }),
                output: Mutex::new(Script {
                    queue: VecDeque::new(),
                    last: Ok(PipelineOutput::default()),
                }),
                submits: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
            }
        }

        fn rejecting(detail: Option<&str>) -> Self {
            Self {
                submit: Err(StatusCode::INTERNAL_SERVER_ERROR),
                submit_detail: detail.map(str::to_string),
                ..Self::accepting()
            }
        }

        fn then_status(self, reply: Reply<Vec<AgentRecord>>) -> Self {
            self.status.lock().unwrap().queue.push_back(reply);
            self
        }

        fn then_output(self, reply: Reply<PipelineOutput>) -> Self {
            self.output.lock().unwrap().queue.push_back(reply);
            self
        }

        fn calls(&self) -> usize {
            self.submits.load(Ordering::SeqCst) + self.polls.load(Ordering::SeqCst)
        }
    }

    fn status_error(status: StatusCode) -> ApiError {
        ApiError::Status {
            status,
            detail: None,
        }
    }

    #[async_trait]
    impl PipelineApi for FakeApi {
        async fn submit(&self, _content: &str) -> Result<(), ApiError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            self.submit.map_err(|status| ApiError::Status {
                status,
                detail: self.submit_detail.clone(),
            })
        }

        async fn fetch_status(&self) -> Result<Vec<AgentRecord>, ApiError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.status.lock().unwrap().next().map_err(status_error)
        }

        async fn fetch_output(&self) -> Result<PipelineOutput, ApiError> {
            self.output.lock().unwrap().next().map_err(status_error)
        }

        async fn health(&self) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn stages(statuses: [AgentStatus; 4]) -> Vec<AgentRecord> {
        KNOWN_STAGES
            .iter()
            .zip(statuses)
            .map(|(name, status)| AgentRecord {
                name: name.to_string(),
                status,
            })
            .collect()
    }

    fn ready(content: &str) -> PipelineOutput {
        PipelineOutput {
            ready: true,
            content: content.to_string(),
        }
    }

    fn controller(api: &Arc<FakeApi>) -> RunController {
        RunController::new(api.clone(), PERIOD)
    }

    async fn tick(ctl: &mut RunController) {
        let report = ctl.next_tick().await.expect("tick channel open");
        ctl.on_tick(report);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_input_is_rejected_without_network_calls() {
        let api = Arc::new(FakeApi::accepting());
        let mut ctl = controller(&api);

        for input in ["", "   ", "\n\t  \n"] {
            assert_eq!(ctl.start(input).await, Err(ValidationError));
        }
        time::sleep(PERIOD * 3).await;

        assert_eq!(api.calls(), 0);
        assert_eq!(ctl.phase(), Phase::Idle);
        assert_eq!(ctl.active_schedules(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_submission_starts_polling_at_the_period() {
        let api = Arc::new(FakeApi::accepting());
        let mut ctl = controller(&api);

        ctl.start("hello").await.unwrap();
        assert_eq!(ctl.phase(), Phase::Polling);
        assert_eq!(ctl.active_schedules(), 1);
        assert_eq!(ctl.snapshot().agents, seed_agents());

        time::sleep(PERIOD - Duration::from_millis(10)).await;
        assert_eq!(api.polls.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(api.polls.load(Ordering::SeqCst), 1);
        time::sleep(PERIOD).await;
        assert_eq!(api.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_submission_fails_without_polling() {
        let api = Arc::new(FakeApi::rejecting(Some("Docker is not running.")));
        let mut ctl = controller(&api);

        ctl.start("hello").await.unwrap();
        let snap = ctl.snapshot();
        assert_eq!(snap.phase, Phase::Failed);
        assert_eq!(snap.last_error.as_deref(), Some("Docker is not running."));
        assert_eq!(ctl.active_schedules(), 0);

        time::sleep(PERIOD * 4).await;
        assert_eq!(api.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_submission_without_detail_uses_generic_message() {
        let api = Arc::new(FakeApi::rejecting(None));
        let mut ctl = controller(&api);

        ctl.start("hello").await.unwrap();
        assert_eq!(
            ctl.snapshot().last_error.as_deref(),
            Some("Failed to start pipeline")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_polling_while_nothing_is_ready() {
        use AgentStatus::*;
        let api = Arc::new(
            FakeApi::accepting().then_status(Ok(stages([Done, Running, Pending, Pending]))),
        );
        let mut ctl = controller(&api);
        ctl.start("hello").await.unwrap();

        for _ in 0..20 {
            tick(&mut ctl).await;
            assert_eq!(ctl.phase(), Phase::Polling);
        }
        assert!(ctl.is_polling());
        assert_eq!(ctl.snapshot().agents[1].status, Running);
    }

    #[tokio::test(start_paused = true)]
    async fn hello_run_settles_with_the_delivered_digest() {
        use AgentStatus::*;
        let digest = "# Digest\n\n- item one\n- item two\n";
        let api = Arc::new(
            FakeApi::accepting()
                .then_status(Ok(stages([Done, Running, Pending, Pending])))
                .then_status(Ok(stages([Done, Done, Done, Done])))
                .then_output(Ok(PipelineOutput::default()))
                .then_output(Ok(ready(digest))),
        );
        let mut ctl = controller(&api);
        ctl.start("hello").await.unwrap();

        tick(&mut ctl).await;
        assert_eq!(ctl.phase(), Phase::Polling);
        assert_eq!(ctl.snapshot().agents, stages([Done, Running, Pending, Pending]));

        tick(&mut ctl).await;
        let snap = ctl.snapshot();
        assert_eq!(snap.phase, Phase::Succeeded);
        assert_eq!(snap.output_text, digest);
        assert_eq!(snap.last_error, None);
        assert_eq!(ctl.active_schedules(), 0);

        let polls = api.polls.load(Ordering::SeqCst);
        time::sleep(PERIOD * 5).await;
        assert_eq!(api.polls.load(Ordering::SeqCst), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_poll_interval_fails_instead_of_hanging() {
        let api = Arc::new(FakeApi::accepting().then_output(Ok(ready("# Digest"))));
        let mut ctl = RunController::new(api.clone(), Duration::ZERO);
        ctl.start("hello").await.unwrap();

        assert_eq!(ctl.phase(), Phase::Failed);
        assert!(!ctl.is_polling());
        assert_eq!(ctl.active_schedules(), 0);
        assert_eq!(
            ctl.snapshot().last_error.as_deref(),
            Some("poll interval must be greater than zero")
        );
        assert_eq!(ctl.run_to_completion().await, Phase::Failed);
    }

    #[tokio::test]
    async fn unreachable_backend_fails_submission() {
        use crate::backend::HttpPipelineClient;
        use crate::model::RunConfig;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let cfg = RunConfig {
            base_url: format!("http://{addr}"),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let api: Arc<dyn PipelineApi> =
            Arc::new(HttpPipelineClient::new(&cfg).expect("client"));
        let mut ctl = RunController::new(api, PERIOD);
        ctl.start("hello").await.unwrap();

        let snap = ctl.snapshot();
        assert_eq!(snap.phase, Phase::Failed);
        assert_eq!(snap.last_error.as_deref(), Some("Failed to reach API"));
        assert_eq!(ctl.active_schedules(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn errored_stage_fails_the_run() {
        use AgentStatus::*;
        let api = Arc::new(
            FakeApi::accepting().then_status(Ok(stages([Done, Error, Pending, Pending]))),
        );
        let mut ctl = controller(&api);
        ctl.start("hello").await.unwrap();

        assert_eq!(ctl.run_to_completion().await, Phase::Failed);
        let snap = ctl.snapshot();
        assert_eq!(snap.last_error.as_deref(), Some(STAGE_FAILURE_MESSAGE));
        assert!(snap.output_text.is_empty());
        assert_eq!(ctl.active_schedules(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_output_wins_over_errored_stage() {
        use AgentStatus::*;
        let api = Arc::new(
            FakeApi::accepting()
                .then_status(Ok(stages([Done, Done, Done, Error])))
                .then_output(Ok(ready("# Digest"))),
        );
        let mut ctl = controller(&api);
        ctl.start("hello").await.unwrap();

        assert_eq!(ctl.run_to_completion().await, Phase::Succeeded);
        assert_eq!(ctl.snapshot().output_text, "# Digest");
        assert_eq!(ctl.snapshot().last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_polls_are_skipped_silently() {
        use AgentStatus::*;
        let api = Arc::new(
            FakeApi::accepting()
                .then_status(Err(StatusCode::SERVICE_UNAVAILABLE))
                .then_status(Ok(stages([Done, Done, Running, Pending])))
                .then_status(Ok(stages([Done, Done, Done, Done])))
                .then_output(Ok(PipelineOutput::default()))
                .then_output(Err(StatusCode::BAD_GATEWAY))
                .then_output(Ok(ready("# Digest"))),
        );
        let mut ctl = controller(&api);
        ctl.start("hello").await.unwrap();

        tick(&mut ctl).await;
        assert_eq!(ctl.snapshot().agents, seed_agents());
        assert_eq!(ctl.phase(), Phase::Polling);
        assert_eq!(ctl.snapshot().last_error, None);

        tick(&mut ctl).await;
        assert_eq!(ctl.snapshot().agents, seed_agents());
        assert!(ctl.is_polling());

        tick(&mut ctl).await;
        assert_eq!(ctl.phase(), Phase::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_schedule_changes_nothing() {
        let api = Arc::new(FakeApi::accepting());
        let mut ctl = controller(&api);

        ctl.stop();
        ctl.stop();
        let snap = ctl.snapshot();
        assert_eq!(snap.phase, Phase::Idle);
        assert!(snap.agents.is_empty());
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn results_arriving_after_stop_are_ignored() {
        use AgentStatus::*;
        let api = Arc::new(
            FakeApi::accepting()
                .then_status(Ok(stages([Done, Done, Done, Done])))
                .then_output(Ok(ready("# Digest"))),
        );
        let mut ctl = controller(&api);
        ctl.start("hello").await.unwrap();

        // Let one poll land in the channel, then tear down before applying it.
        time::sleep(PERIOD + Duration::from_millis(10)).await;
        ctl.stop();
        tick(&mut ctl).await;

        let snap = ctl.snapshot();
        assert_eq!(snap.phase, Phase::Polling);
        assert_eq!(snap.agents, seed_agents());
        assert!(snap.output_text.is_empty());
        assert!(!ctl.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_the_previous_schedule() {
        use AgentStatus::*;
        let api = Arc::new(
            FakeApi::accepting()
                .then_status(Ok(stages([Done, Error, Pending, Pending])))
                .then_status(Ok(stages([Running, Pending, Pending, Pending]))),
        );
        let mut ctl = controller(&api);

        ctl.start("first").await.unwrap();
        assert_eq!(ctl.active_schedules(), 1);
        time::sleep(PERIOD + Duration::from_millis(10)).await;

        ctl.start("second").await.unwrap();
        assert_eq!(ctl.active_schedules(), 1);
        assert_eq!(api.submits.load(Ordering::SeqCst), 2);

        // The first run's errored poll is stale and must not fail the second run.
        tick(&mut ctl).await;
        assert_eq!(ctl.phase(), Phase::Polling);
        assert_eq!(ctl.snapshot().input_text, "second");
        assert_eq!(ctl.snapshot().agents, seed_agents());

        tick(&mut ctl).await;
        assert_eq!(ctl.phase(), Phase::Polling);
        assert_eq!(ctl.snapshot().agents[0].status, Running);
        assert!(ctl.active_schedules() <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_terminal_phase_resets_the_run() {
        let api = Arc::new(FakeApi::rejecting(Some("boom")));
        let mut ctl = controller(&api);
        ctl.start("hello").await.unwrap();
        assert_eq!(ctl.phase(), Phase::Failed);

        let api2 = Arc::new(FakeApi::accepting());
        ctl.api = api2 as Arc<dyn PipelineApi>;
        ctl.start("again").await.unwrap();
        let snap = ctl.snapshot();
        assert_eq!(snap.phase, Phase::Polling);
        assert_eq!(snap.last_error, None);
        assert!(snap.output_text.is_empty());
        assert_eq!(snap.agents, seed_agents());
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_snapshots_for_each_transition() {
        let api = Arc::new(FakeApi::accepting().then_output(Ok(ready("# Digest"))));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ctl = controller(&api).with_events(tx);

        ctl.start("hello").await.unwrap();
        ctl.run_to_completion().await;

        let mut phases = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let RunEvent::Updated { snapshot } = ev {
                phases.push(snapshot.phase);
            }
        }
        assert_eq!(
            phases,
            vec![Phase::Submitting, Phase::Polling, Phase::Succeeded]
        );
    }
}
