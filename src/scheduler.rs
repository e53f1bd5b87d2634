//! Stage scheduler: drives the pool through the plan and owns the run
//! lifecycle.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::aggregator::RunSummary;
use crate::context::{RunContext, RunState, StopReason};
use crate::metrics::{CURRENT_STAGE, VIRTUAL_USERS_TARGET};
use crate::pool::{DrainReport, VirtualUserPool};
use crate::utils::format_duration;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("run cannot start from state '{0}'")]
    AlreadyStarted(RunState),
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stop_reason: StopReason,
    pub summary: RunSummary,
    pub drain: DrainReport,

    /// Wall-clock time from start until every user stopped
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,

    /// Most virtual users alive at once, stragglers included
    pub peak_users: usize,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

pub struct Scheduler {
    ctx: Arc<RunContext>,
}

impl Scheduler {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    /// Runs the plan to completion, timeout or abort, then drains every user.
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let ctx = &self.ctx;
        if !ctx.transition(RunState::Pending, RunState::Running) {
            return Err(RunError::AlreadyStarted(ctx.state()));
        }

        let settings = &ctx.settings;
        let start = ctx.started_at().unwrap_or_else(Instant::now);
        // RunPlan caps its total duration, so this stays in range.
        let plan_end = start + ctx.plan.total_duration();

        info!(
            stages = ctx.plan.stages().len(),
            total_duration = %format_duration(ctx.plan.total_duration()),
            peak_target = ctx.plan.peak_target(),
            "Run started"
        );

        let mut pool = VirtualUserPool::new(ctx.clone());
        let mut ticker = time::interval(settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // A cap too far out to represent as an Instant never fires.
        let deadline = settings.max_duration.and_then(|d| start.checked_add(d));
        let timeout = async move {
            match deadline {
                Some(deadline) => time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timeout);

        let mut current_stage: Option<usize> = None;
        let mut next_progress = start.checked_add(settings.progress_interval);
        let mut peak_users = 0usize;

        let stop_reason = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let elapsed = start.elapsed();
                    let Some(position) = ctx.plan.position_at(elapsed) else {
                        break StopReason::PlanComplete;
                    };

                    if current_stage != Some(position.stage_index) {
                        let stage = &ctx.plan.stages()[position.stage_index];
                        info!(
                            stage = position.stage_index + 1,
                            of = ctx.plan.stages().len(),
                            duration = %format_duration(stage.duration),
                            stage_target = stage.target,
                            "Entering stage"
                        );
                        CURRENT_STAGE.set(position.stage_index as i64);
                        current_stage = Some(position.stage_index);
                    }

                    pool.reap();
                    pool.set_target(position.target);
                    VIRTUAL_USERS_TARGET.set(position.target as i64);
                    peak_users = peak_users.max(pool.size());

                    if next_progress.is_some_and(|at| Instant::now() >= at) {
                        let summary = ctx.aggregator.summarize();
                        info!(
                            elapsed = %format_duration(Duration::from_secs(elapsed.as_secs())),
                            stage = position.stage_index + 1,
                            target = position.target,
                            active = ctx.active_users().get(),
                            stragglers = pool.stragglers(),
                            "{}",
                            summary.format_progress()
                        );
                        next_progress = next_progress
                            .and_then(|at| at.checked_add(settings.progress_interval));
                    }
                }
                _ = time::sleep_until(plan_end) => {
                    // Apply the final stage's target before stopping.
                    if let Some(target) = ctx.plan.target_at(ctx.plan.total_duration()) {
                        pool.set_target(target);
                        VIRTUAL_USERS_TARGET.set(target as i64);
                    }
                    break StopReason::PlanComplete;
                }
                _ = ctx.cancel_token().cancelled() => {
                    break StopReason::Aborted;
                }
                _ = &mut timeout => {
                    warn!(
                        max_duration = ?settings.max_duration,
                        "Max duration reached before the plan finished"
                    );
                    ctx.cancel_token().cancel();
                    break StopReason::Timeout;
                }
            }
        };

        ctx.transition(RunState::Running, RunState::Draining);
        info!(reason = %stop_reason, "Running phase finished");
        VIRTUAL_USERS_TARGET.set(0);

        let drain = pool.drain(settings.graceful_stop).await;
        ctx.transition(RunState::Draining, RunState::Completed);

        let summary = ctx.aggregator.summarize();
        let elapsed = start.elapsed();
        info!(
            reason = %stop_reason,
            elapsed = %format_duration(Duration::from_millis(elapsed.as_millis() as u64)),
            requests = summary.total_requests,
            errors = summary.failed_requests,
            graceful_exits = drain.graceful,
            aborted_users = drain.aborted,
            "Run completed"
        );

        Ok(RunReport {
            stop_reason,
            summary,
            drain,
            elapsed,
            peak_users,
        })
    }
}
