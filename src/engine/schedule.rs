//! Staged ramp schedule: maps elapsed run time to a target VU count.

use crate::error::ConfigError;
use serde::Serialize;
use std::time::Duration;

/// One ramp segment: move linearly to `target` VUs over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// Direction of the stage containing a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RampingUp,
    Steady,
    RampingDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    start_vus: usize,
    stages: Vec<Stage>,
    total: Duration,
}

impl Schedule {
    /// Build a schedule, rejecting an empty stage list or zero-length stages.
    pub fn new(start_vus: usize, stages: Vec<Stage>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::EmptySchedule);
        }
        if let Some(index) = stages.iter().position(|s| s.duration.is_zero()) {
            return Err(ConfigError::ZeroDurationStage { index });
        }
        let total = stages
            .iter()
            .try_fold(Duration::ZERO, |acc, s| acc.checked_add(s.duration))
            .ok_or(ConfigError::ScheduleTooLong)?;
        Ok(Self {
            start_vus,
            stages,
            total,
        })
    }

    /// Constant load of `vus` for `duration`.
    pub fn constant(vus: usize, duration: Duration) -> Result<Self, ConfigError> {
        Self::new(vus, vec![Stage::new(duration, vus)])
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn start_vus(&self) -> usize {
        self.start_vus
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Highest VU count the schedule ever asks for.
    pub fn max_target(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_vus, usize::max)
    }

    /// Target VU count at `elapsed`, interpolated between the boundary targets of
    /// the containing stage. Zero once the schedule has run out.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        match self.locate(elapsed) {
            Some((from, stage, offset)) => {
                let progress = offset.as_secs_f64() / stage.duration.as_secs_f64();
                let exact = from as f64 + (stage.target as f64 - from as f64) * progress;
                round_half_down(exact)
            }
            None => 0,
        }
    }

    pub fn phase_at(&self, elapsed: Duration) -> Phase {
        match self.locate(elapsed) {
            Some((from, stage, _)) if stage.target > from => Phase::RampingUp,
            Some((from, stage, _)) if stage.target < from => Phase::RampingDown,
            Some(_) => Phase::Steady,
            None => Phase::RampingDown,
        }
    }

    /// Returns (boundary target at stage start, stage, offset into the stage).
    fn locate(&self, elapsed: Duration) -> Option<(usize, &Stage, Duration)> {
        let mut stage_start = Duration::ZERO;
        let mut from = self.start_vus;
        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                return Some((from, stage, elapsed - stage_start));
            }
            stage_start = stage_end;
            from = stage.target;
        }
        None
    }
}

/// Round to the nearest integer; an exact half goes to the lower count.
fn round_half_down(value: f64) -> usize {
    let floor = value.floor();
    let rounded = if value - floor > 0.5 { floor + 1.0 } else { floor };
    rounded.max(0.0) as usize
}
