//! Repeating poll timer with at most one live schedule.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Identifies one schedule; ticks from a cancelled schedule can be told apart by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ScheduleId(u64);

struct ActiveSchedule {
    id: ScheduleId,
    timer: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct PollScheduler {
    active: Option<ActiveSchedule>,
    next_id: u64,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start firing `callback` every `period`, first firing one period from now.
    ///
    /// Any schedule that is still active is cancelled first. Each firing runs
    /// in its own task, so a slow callback does not hold back the next one.
    /// Returns `None`, leaving nothing scheduled, when `period` is zero.
    pub fn schedule<F, Fut>(&mut self, period: Duration, callback: F) -> Option<ScheduleId>
    where
        F: Fn(ScheduleId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        if period.is_zero() {
            tracing::warn!("refusing to schedule polling with a zero period");
            return None;
        }

        self.next_id += 1;
        let id = ScheduleId(self.next_id);

        let timer = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tokio::spawn(callback(id));
            }
        });

        tracing::debug!(schedule = id.0, period_ms = period.as_millis() as u64, "poll schedule started");
        self.active = Some(ActiveSchedule { id, timer });
        Some(id)
    }

    /// Stop future firings. No-op when nothing is scheduled.
    ///
    /// Callback tasks already spawned are left to finish; their results are
    /// recognisable by the now-inactive [`ScheduleId`].
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            // Dropping a JoinHandle detaches the task; it has to be aborted.
            active.timer.abort();
            tracing::debug!(schedule = active.id.0, "poll schedule cancelled");
        }
    }

    pub fn active_id(&self) -> Option<ScheduleId> {
        self.active.as_ref().map(|a| a.id)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        usize::from(self.active.is_some())
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
