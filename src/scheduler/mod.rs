//! Ramp profile evaluation.
//!
//! A profile is an ordered list of stages. Each stage ramps linearly from the
//! previous stage's target (0 before the first stage) to its own target over
//! its duration. The [`Scheduler`] turns the target at a given elapsed time
//! into start/stop directives for the executor.

use std::cmp::Ordering;
use std::time::Duration;

use crate::models::dsl_model::Stage;

/// What the executor has to do to converge on the current target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Start(u64),
    Stop(u64),
    Hold,
    /// The profile is over. Every virtual user must be stopped and drained.
    Finished,
}

/// Target concurrency at `elapsed` since test start.
///
/// Values between stage boundaries are rounded up: a ramp from 0 to 1 has one
/// user as soon as it starts, and a ramp down releases a user only once the
/// line has dropped below it. The result always lies between the stage's
/// starting value and its target.
pub fn target_at(stages: &[Stage], elapsed: Duration) -> u64 {
    let mut start = Duration::ZERO;
    let mut from = 0u64;

    for stage in stages {
        let end = start.saturating_add(stage.duration);
        if elapsed < end {
            let into = (elapsed - start).as_nanos() as i128;
            let span = stage.duration.as_nanos() as i128;
            let delta = stage.target as i128 - from as i128;
            let scaled = from as i128 * span + delta * into;
            return ((scaled + span - 1) / span) as u64;
        }
        start = end;
        from = stage.target;
    }

    if elapsed == start {
        from
    } else {
        0
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    stages: Vec<Stage>,
    total: Duration,
    active: u64,
}

impl Scheduler {
    pub fn new(stages: Vec<Stage>) -> Self {
        let total = stages
            .iter()
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration));
        Self {
            stages,
            total,
            active: 0,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Virtual users started and not yet told to stop.
    pub fn active(&self) -> u64 {
        self.active
    }

    pub fn target(&self, elapsed: Duration) -> u64 {
        target_at(&self.stages, elapsed)
    }

    /// Computes the directive for `elapsed` and assumes the executor applies
    /// it before the next tick.
    pub fn tick(&mut self, elapsed: Duration) -> Directive {
        if elapsed > self.total {
            self.active = 0;
            return Directive::Finished;
        }

        let target = self.target(elapsed);
        match target.cmp(&self.active) {
            Ordering::Greater => {
                let n = target - self.active;
                self.active = target;
                Directive::Start(n)
            }
            Ordering::Less => {
                let n = self.active - target;
                self.active = target;
                Directive::Stop(n)
            }
            Ordering::Equal => Directive::Hold,
        }
    }
}
