use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::repository::{Clock, PledgeStore};
use super::service::PledgeService;

/// Once-a-day trigger for the expiry sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSchedule {
    run_at: NaiveTime,
    last_run: Option<NaiveDate>,
}

impl SweepSchedule {
    pub fn daily_at(run_at: NaiveTime) -> Self {
        Self {
            run_at,
            last_run: None,
        }
    }

    pub fn run_at(&self) -> NaiveTime {
        self.run_at
    }

    pub fn last_run(&self) -> Option<NaiveDate> {
        self.last_run
    }

    /// Due once `now` has passed `run_at` on a day that has not been swept yet.
    /// A process started late in the day therefore catches up immediately.
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        now.time() >= self.run_at && self.last_run.map_or(true, |day| day < now.date())
    }

    pub fn mark_run(&mut self, day: NaiveDate) {
        self.last_run = Some(day);
    }
}

/// Totals reported when the sweeper loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweeperStats {
    pub sweeps: usize,
    pub defaulted: usize,
    pub failures: usize,
}

/// Background loop that runs [`PledgeService::sweep_expired`] on schedule.
pub struct ExpirySweeper<S, C> {
    service: Arc<PledgeService<S, C>>,
    schedule: SweepSchedule,
    poll_interval: Duration,
    stats: SweeperStats,
}

impl<S, C> ExpirySweeper<S, C>
where
    S: PledgeStore + 'static,
    C: Clock + 'static,
{
    pub fn new(
        service: Arc<PledgeService<S, C>>,
        schedule: SweepSchedule,
        poll_interval: Duration,
    ) -> Self {
        Self {
            service,
            schedule,
            poll_interval,
            stats: SweeperStats::default(),
        }
    }

    pub fn schedule(&self) -> SweepSchedule {
        self.schedule
    }

    /// Poll until `shutdown` resolves, sweeping whenever the schedule is due.
    pub async fn run<F>(mut self, shutdown: F) -> SweeperStats
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            run_at = %self.schedule.run_at(),
            poll_secs = self.poll_interval.as_secs_f64(),
            "expiry sweeper started"
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
        info!(
            sweeps = self.stats.sweeps,
            defaulted = self.stats.defaulted,
            "expiry sweeper stopped"
        );
        self.stats
    }

    /// Run the sweep if it is due. A failed sweep leaves the day unmarked so
    /// the next poll retries it.
    pub async fn tick(&mut self) {
        let now = self.service.clock().local_now();
        if !self.schedule.is_due(now) {
            debug!(%now, "expiry sweep not due");
            return;
        }

        let as_of = now.date();
        let service = Arc::clone(&self.service);
        match tokio::task::spawn_blocking(move || service.sweep_expired(as_of)).await {
            Ok(Ok(defaulted)) => {
                self.schedule.mark_run(as_of);
                self.stats.sweeps += 1;
                self.stats.defaulted += defaulted;
            }
            Ok(Err(err)) => {
                self.stats.failures += 1;
                warn!(%as_of, error = %err, "scheduled expiry sweep failed");
            }
            Err(err) => {
                self.stats.failures += 1;
                warn!(%as_of, error = %err, "expiry sweep worker panicked");
            }
        }
    }
}
