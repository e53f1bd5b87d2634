//! Virtual user pool.
//!
//! Each virtual user is an independent tokio task looping invoke → record →
//! think until its stop token fires. Shrinking stops the most recently
//! started users first; each gets the graceful ramp-down window to finish
//! its current iteration before it is aborted.

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::metrics::VIRTUAL_USERS_ABORTED_TOTAL;
use crate::plan::MAX_PLAN_DURATION;

/// A running virtual user, owned by the pool.
#[derive(Debug)]
pub struct VirtualUser {
    id: u64,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl VirtualUser {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True until the user's task has returned (or been aborted).
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// A user told to stop that may still be finishing its iteration.
#[derive(Debug)]
struct Straggler {
    user: VirtualUser,
    deadline: Instant,
}

/// How virtual users ended over the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Users that exited on their own after being told to stop
    pub graceful: usize,

    /// Users hard-aborted because their grace period ran out
    pub aborted: usize,
}

/// Owns every virtual user of a run.
pub struct VirtualUserPool {
    ctx: Arc<RunContext>,
    /// Running users in start order; shrinking pops from the back.
    running: Vec<VirtualUser>,
    stragglers: Vec<Straggler>,
    next_id: u64,
    report: DrainReport,
}

impl VirtualUserPool {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self {
            ctx,
            running: Vec::new(),
            stragglers: Vec::new(),
            next_id: 0,
            report: DrainReport::default(),
        }
    }

    /// Grows or shrinks the pool towards `target` running users.
    pub fn set_target(&mut self, target: u32) {
        let target = target as usize;
        let current = self.running.len();

        if target > current {
            for _ in current..target {
                self.spawn_user();
            }
            debug!(from = current, to = target, "Pool grown");
        } else if target < current {
            let deadline = grace_deadline(self.ctx.settings.graceful_ramp_down);
            for _ in target..current {
                if let Some(user) = self.running.pop() {
                    user.stop.cancel();
                    debug!(vu_id = user.id, "Virtual user signalled to stop");
                    self.stragglers.push(Straggler { user, deadline });
                }
            }
            debug!(
                from = current,
                to = target,
                stragglers = self.stragglers.len(),
                "Pool shrunk"
            );
        }
    }

    fn spawn_user(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let stop = self.ctx.cancel_token().child_token();
        let handle = tokio::spawn(run_virtual_user(id, self.ctx.clone(), stop.clone()));
        self.running.push(VirtualUser { id, stop, handle });
    }

    /// Removes finished stragglers, aborts those past their deadline, and
    /// drops running users whose task ended unexpectedly.
    pub fn reap(&mut self) {
        let now = Instant::now();
        let report = &mut self.report;
        self.stragglers.retain(|straggler| {
            if !straggler.user.is_running() {
                report.graceful += 1;
                false
            } else if now >= straggler.deadline {
                straggler.user.handle.abort();
                VIRTUAL_USERS_ABORTED_TOTAL.inc();
                report.aborted += 1;
                warn!(
                    vu_id = straggler.user.id,
                    "Virtual user exceeded graceful ramp-down, aborting"
                );
                false
            } else {
                true
            }
        });

        let aborted = self.ctx.is_aborted();
        self.running.retain(|user| {
            if user.is_running() {
                true
            } else {
                if aborted {
                    debug!(vu_id = user.id, "Virtual user stopped by run cancellation");
                } else {
                    warn!(vu_id = user.id, "Virtual user task ended unexpectedly");
                }
                false
            }
        });
    }

    /// Users still holding a task: running plus stragglers.
    pub fn size(&self) -> usize {
        self.running.len() + self.stragglers.len()
    }

    /// Users not yet told to stop.
    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Users told to stop that have not been reaped yet.
    pub fn stragglers(&self) -> usize {
        self.stragglers.len()
    }

    /// Stops every user, waits up to `grace` for each, and aborts the rest.
    ///
    /// Stragglers from an earlier ramp-down keep their own deadline if it
    /// comes sooner.
    pub async fn drain(&mut self, grace: Duration) -> DrainReport {
        let drain_deadline = grace_deadline(grace);
        for user in self.running.drain(..) {
            user.stop.cancel();
            self.stragglers.push(Straggler {
                user,
                deadline: drain_deadline,
            });
        }

        info!(
            users = self.stragglers.len(),
            grace_secs = grace.as_secs_f64(),
            "Draining virtual users"
        );

        for straggler in self.stragglers.drain(..) {
            let Straggler { user, deadline } = straggler;
            let mut handle = user.handle;
            let deadline = deadline.min(drain_deadline);

            match time::timeout_at(deadline, &mut handle).await {
                Ok(_) => self.report.graceful += 1,
                Err(_) => {
                    handle.abort();
                    // Let the aborted task unwind so its guards release.
                    let _ = handle.await;
                    VIRTUAL_USERS_ABORTED_TOTAL.inc();
                    self.report.aborted += 1;
                    warn!(vu_id = user.id, "Virtual user exceeded graceful stop, aborting");
                }
            }
        }

        self.report
    }
}

impl Drop for VirtualUserPool {
    fn drop(&mut self) {
        for user in &self.running {
            user.handle.abort();
        }
        for straggler in &self.stragglers {
            straggler.user.handle.abort();
        }
    }
}

/// Deadline `grace` from now. Grace periods beyond the plan ceiling are
/// clamped to it.
fn grace_deadline(grace: Duration) -> Instant {
    Instant::now() + grace.min(MAX_PLAN_DURATION)
}

/// Body of one virtual user task.
///
/// Request failures are recorded and the loop continues after the usual
/// think time. Only the stop token ends the loop, and never mid-request.
async fn run_virtual_user(id: u64, ctx: Arc<RunContext>, stop: CancellationToken) {
    let _active = ctx.active_users().enter();
    debug!(vu_id = id, "Virtual user started");

    let mut iterations: u64 = 0;
    loop {
        if stop.is_cancelled() {
            break;
        }

        let result = ctx.invoker.invoke().await;
        if let Some(err) = result.error() {
            debug!(
                vu_id = id,
                error_category = err.category.label(),
                error = %err,
                "Request failed"
            );
        }
        ctx.aggregator.record(result);
        iterations += 1;

        let pause = ctx.think_time.calculate_delay();
        tokio::select! {
            _ = time::sleep(pause) => {}
            _ = stop.cancelled() => break,
        }
    }

    debug!(vu_id = id, iterations = iterations, "Virtual user stopped");
}
