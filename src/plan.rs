//! Staged concurrency plans.
//!
//! A [`RunPlan`] is an ordered list of [`Stage`]s. Each stage moves the target
//! number of virtual users from where the previous stage ended (or from the
//! plan's start target) to its own target, either as a linear ramp or as a
//! step at the stage boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

use crate::utils::format_duration;

/// Longest run a plan may describe. Keeps deadline arithmetic on
/// `Instant` well inside its range.
pub const MAX_PLAN_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How concurrency moves between two stage boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Interpolate linearly from the previous value to the stage target.
    #[default]
    Linear,

    /// Jump to the stage target as soon as the stage begins.
    Step,
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interpolation::Linear => write!(f, "linear"),
            Interpolation::Step => write!(f, "step"),
        }
    }
}

/// Errors raised while building a plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan must contain at least one stage")]
    Empty,

    #[error("stage {index}: duration must be greater than zero")]
    ZeroDuration { index: usize },

    #[error("stages add up to more than {}", format_duration(MAX_PLAN_DURATION))]
    TooLong,
}

/// A configured time interval with a target concurrency level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u32,
    /// Overrides the plan's default interpolation for this stage only.
    pub interpolation: Option<Interpolation>,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self {
            duration,
            target,
            interpolation: None,
        }
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = Some(interpolation);
        self
    }
}

/// Where a point in time falls within a plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanPosition {
    /// Index of the active stage.
    pub stage_index: usize,
    /// Target concurrency at this instant.
    pub target: u32,
}

/// Immutable, validated sequence of stages.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    stages: Vec<Stage>,
    start_target: u32,
    interpolation: Interpolation,
    total_duration: Duration,
}

impl RunPlan {
    /// Builds a plan, rejecting empty stage lists, zero-length stages and
    /// plans longer than [`MAX_PLAN_DURATION`].
    pub fn new(
        stages: Vec<Stage>,
        start_target: u32,
        interpolation: Interpolation,
    ) -> Result<Self, PlanError> {
        if stages.is_empty() {
            return Err(PlanError::Empty);
        }

        if let Some(index) = stages.iter().position(|s| s.duration.is_zero()) {
            return Err(PlanError::ZeroDuration { index });
        }

        let total_duration = stages
            .iter()
            .try_fold(Duration::ZERO, |total, s| total.checked_add(s.duration))
            .filter(|total| *total <= MAX_PLAN_DURATION)
            .ok_or(PlanError::TooLong)?;

        Ok(Self {
            stages,
            start_target,
            interpolation,
            total_duration,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn start_target(&self) -> u32 {
        self.start_target
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    /// Highest concurrency the plan ever asks for.
    pub fn peak_target(&self) -> u32 {
        self.stages
            .iter()
            .map(|s| s.target)
            .max()
            .unwrap_or(0)
            .max(self.start_target)
    }

    /// Returns the target concurrency at `elapsed`, or `None` once the plan is over.
    pub fn target_at(&self, elapsed: Duration) -> Option<u32> {
        self.position_at(elapsed).map(|p| p.target)
    }

    /// Locates `elapsed` within the plan.
    ///
    /// Stage intervals are right-closed: a stage boundary belongs to the stage
    /// that ends there, so the boundary value is that stage's target.
    pub fn position_at(&self, elapsed: Duration) -> Option<PlanPosition> {
        if elapsed > self.total_duration {
            return None;
        }

        if elapsed.is_zero() {
            return Some(PlanPosition {
                stage_index: 0,
                target: self.start_target,
            });
        }

        let elapsed_secs = elapsed.as_secs_f64();
        let mut stage_start_secs = 0.0;
        let mut from = self.start_target;

        for (index, stage) in self.stages.iter().enumerate() {
            let stage_secs = stage.duration.as_secs_f64();
            let stage_end_secs = stage_start_secs + stage_secs;

            if elapsed_secs <= stage_end_secs || index == self.stages.len() - 1 {
                let target = match stage.interpolation.unwrap_or(self.interpolation) {
                    Interpolation::Linear => Self::linear_interpolate(
                        from as f64,
                        stage.target as f64,
                        elapsed_secs - stage_start_secs,
                        stage_secs,
                    ),
                    Interpolation::Step => stage.target as f64,
                };

                return Some(PlanPosition {
                    stage_index: index,
                    target: target.round().max(0.0) as u32,
                });
            }

            stage_start_secs = stage_end_secs;
            from = stage.target;
        }

        None
    }

    fn linear_interpolate(from: f64, to: f64, elapsed: f64, duration: f64) -> f64 {
        if duration <= 0.0 {
            return to;
        }
        let progress = (elapsed / duration).clamp(0.0, 1.0);
        from + (to - from) * progress
    }
}

impl fmt::Display for RunPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "start={}", self.start_target)?;
        for stage in &self.stages {
            write!(
                f,
                " -> {}@{}",
                stage.target,
                format_duration(stage.duration)
            )?;
            if let Some(interpolation) = stage.interpolation {
                write!(f, "({})", interpolation)?;
            }
        }
        write!(
            f,
            " [{}, total {}]",
            self.interpolation,
            format_duration(self.total_duration)
        )
    }
}
