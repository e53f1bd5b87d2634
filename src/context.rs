//! Shared run state passed explicitly to the scheduler and virtual users.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregator::MetricsAggregator;
use crate::client::build_client;
use crate::config::{Config, ConfigError, ExecutionSettings};
use crate::invoker::{HttpInvoker, Invoker};
use crate::metrics::VIRTUAL_USERS_ACTIVE;
use crate::plan::RunPlan;
use crate::think_time::ThinkTime;

/// Lifecycle of a run.
///
/// Transitions only move forward: `Pending → Running → Draining → Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RunState {
    Pending = 0,
    Running = 1,
    Draining = 2,
    Completed = 3,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::Pending,
            1 => RunState::Running,
            2 => RunState::Draining,
            _ => RunState::Completed,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Draining => "draining",
            RunState::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// Why the running phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Elapsed time passed the end of the last stage
    PlanComplete,

    /// The configured maximum duration was reached first
    Timeout,

    /// An operator or caller cancelled the run
    Aborted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StopReason::PlanComplete => "plan complete",
            StopReason::Timeout => "max duration reached",
            StopReason::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// Atomic holder for [`RunState`].
#[derive(Debug)]
pub struct RunStateCell(AtomicU8);

impl RunStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(RunState::Pending as u8))
    }

    pub fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`. Returns false if the current state is not
    /// `from` or the move would go backwards.
    pub fn transition(&self, from: RunState, to: RunState) -> bool {
        if to <= from {
            return false;
        }
        let moved = self
            .0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            debug!(from = %from, to = %to, "Run state changed");
        } else {
            warn!(from = %from, to = %to, current = %self.get(), "Rejected run state change");
        }
        moved
    }
}

impl Default for RunStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Count of virtual user tasks currently alive.
///
/// Cheap to clone; every clone shares the same counter. Mirrors into the
/// `virtual_users_active` gauge.
#[derive(Debug, Clone, Default)]
pub struct ActiveVuCounter(Arc<AtomicU32>);

impl ActiveVuCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    /// Counts the caller as active until the returned guard drops.
    ///
    /// The guard also runs when a task is aborted, so the count stays right
    /// for hard-stopped users.
    pub fn enter(&self) -> ActiveVuGuard {
        self.0.fetch_add(1, Ordering::Relaxed);
        VIRTUAL_USERS_ACTIVE.inc();
        ActiveVuGuard(self.clone())
    }
}

/// Decrements the [`ActiveVuCounter`] on drop.
#[derive(Debug)]
pub struct ActiveVuGuard(ActiveVuCounter);

impl Drop for ActiveVuGuard {
    fn drop(&mut self) {
        (self.0).0.fetch_sub(1, Ordering::Relaxed);
        VIRTUAL_USERS_ACTIVE.dec();
    }
}

/// Everything a run needs, owned in one place.
pub struct RunContext {
    pub plan: RunPlan,
    pub invoker: Arc<dyn Invoker>,
    pub aggregator: Arc<MetricsAggregator>,
    pub think_time: ThinkTime,
    pub settings: ExecutionSettings,
    cancel: CancellationToken,
    state: RunStateCell,
    active: ActiveVuCounter,
    started_at: std::sync::OnceLock<Instant>,
}

impl RunContext {
    pub fn new(
        plan: RunPlan,
        invoker: Arc<dyn Invoker>,
        think_time: ThinkTime,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            plan,
            invoker,
            aggregator: Arc::new(MetricsAggregator::new()),
            think_time,
            settings,
            cancel: CancellationToken::new(),
            state: RunStateCell::new(),
            active: ActiveVuCounter::new(),
            started_at: std::sync::OnceLock::new(),
        }
    }

    /// Builds the HTTP client and invoker a resolved config describes.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let client = build_client(&config.to_client_config())?;
        let invoker = HttpInvoker::new(client, config.request_template()?, config.request_timeout);
        Ok(Self::new(
            config.plan.clone(),
            Arc::new(invoker),
            config.think_time.clone(),
            config.execution.clone(),
        ))
    }

    /// Root token. Virtual users hold child tokens of it.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Requests a graceful stop: the scheduler stops ramping and drains.
    pub fn abort(&self) {
        if !self.cancel.is_cancelled() {
            warn!(state = %self.state(), "Run abort requested");
        }
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> RunState {
        self.state.get()
    }

    pub fn transition(&self, from: RunState, to: RunState) -> bool {
        let moved = self.state.transition(from, to);
        if moved && to == RunState::Running {
            let _ = self.started_at.set(Instant::now());
        }
        moved
    }

    /// When the run entered `Running`, if it has.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at.get().copied()
    }

    pub fn active_users(&self) -> &ActiveVuCounter {
        &self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_moves_forward_only() {
        let cell = RunStateCell::new();
        assert_eq!(cell.get(), RunState::Pending);
        assert!(!cell.transition(RunState::Running, RunState::Draining));
        assert!(cell.transition(RunState::Pending, RunState::Running));
        assert!(!cell.transition(RunState::Running, RunState::Pending));
        assert!(cell.transition(RunState::Running, RunState::Draining));
        assert!(cell.transition(RunState::Draining, RunState::Completed));
        assert_eq!(cell.get(), RunState::Completed);
    }

    #[test]
    fn active_counter_tracks_guards() {
        let counter = ActiveVuCounter::new();
        let a = counter.enter();
        let b = counter.clone().enter();
        assert_eq!(counter.get(), 2);
        drop(a);
        assert_eq!(counter.get(), 1);
        drop(b);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn labels() {
        assert_eq!(RunState::Draining.to_string(), "draining");
        assert_eq!(StopReason::Timeout.to_string(), "max duration reached");
    }
}
