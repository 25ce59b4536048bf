//! Watch scheduler that polls the configured pull requests for apply-all
//! commands on a fixed interval.
//!
//! The scheduler never proposes resolutions. A watched pull request needs a
//! prior `conflictbot propose` run before its commands have anything to
//! apply.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, error, info, warn};

use conflictbot_core::config::WatchTarget;
use conflictbot_core::workflow::{CycleOutcome, PullRequestWorkflow};

/// Aggregate counters across ticks.
pub struct SchedulerStats {
    pub total_ticks: AtomicU64,
    pub total_applied: AtomicU64,
    pub total_errors: AtomicU64,
    pub consecutive_errors: AtomicU64,
}

impl SchedulerStats {
    fn new() -> Self {
        Self {
            total_ticks: AtomicU64::new(0),
            total_applied: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            consecutive_errors: AtomicU64::new(0),
        }
    }
}

/// Polls every watched pull request once per tick.
///
/// Pull requests are processed sequentially. A tick that would overlap a
/// running one is skipped rather than queued.
pub struct Scheduler {
    workflow: Arc<PullRequestWorkflow>,
    targets: Vec<WatchTarget>,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    stats: Arc<SchedulerStats>,
}

impl Scheduler {
    pub fn new(
        workflow: Arc<PullRequestWorkflow>,
        targets: Vec<WatchTarget>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            workflow,
            targets,
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SchedulerStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.stats.clone()
    }

    /// Run ticks until `shutdown` is notified. The tick in progress when
    /// the notification arrives is allowed to finish.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        let pr_count: usize = self.targets.iter().map(|t| t.pull_requests.len()).sum();
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            repos = self.targets.len(),
            pull_requests = pr_count,
            "scheduler started"
        );

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.maybe_run_tick().await;
                }
                _ = shutdown.notified() => {
                    info!("scheduler shutting down");
                    break;
                }
            }
        }
    }

    async fn maybe_run_tick(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("skipping tick: previous tick still running");
            return;
        }

        let tick = self.stats.total_ticks.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(tick, "starting watch tick");

        let mut failed = 0u64;
        for target in &self.targets {
            for &pr_number in &target.pull_requests {
                if !self.process(tick, &target.repo, pr_number).await {
                    failed += 1;
                }
            }
        }

        if failed == 0 {
            self.stats.consecutive_errors.store(0, Ordering::SeqCst);
        } else {
            let consecutive = self.stats.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(tick, failed, consecutive_errors = consecutive, "watch tick had failures");
        }

        self.running.store(false, Ordering::SeqCst);
    }

    /// Process one pull request. Returns false when the cycle errored.
    async fn process(&self, tick: u64, repo: &str, pr_number: u64) -> bool {
        match self.workflow.process_commands(repo, pr_number).await {
            Ok(CycleOutcome::NoCommand) => {
                debug!(tick, repo, pr_number, "no new command");
                true
            }
            Ok(CycleOutcome::Applied(cmd)) => {
                self.stats.total_applied.fetch_add(1, Ordering::SeqCst);
                info!(tick, repo, pr_number, user = %cmd.user, comment_id = cmd.comment_id, "apply-all completed");
                true
            }
            Ok(CycleOutcome::NothingToApply(cmd)) => {
                info!(tick, repo, pr_number, user = %cmd.user, "apply-all requested with nothing pending");
                true
            }
            Ok(CycleOutcome::ApplyFailed(cmd)) => {
                warn!(tick, repo, pr_number, user = %cmd.user, "apply-all failed, waiting for a new command or proposal");
                true
            }
            Ok(CycleOutcome::Deferred(cmd)) => {
                debug!(tick, repo, pr_number, comment_id = cmd.comment_id, "command already attempted");
                true
            }
            Err(e) => {
                let errors = self.stats.total_errors.fetch_add(1, Ordering::SeqCst) + 1;
                error!(tick, repo, pr_number, error = %e, total_errors = errors, "command cycle failed");
                false
            }
        }
    }
}
