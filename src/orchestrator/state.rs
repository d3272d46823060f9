//! Stage Sequencing and Run State
//!
//! This module provides the state tracking structures used by the sequence
//! runner to drive a test cycle across its stages.
//!
//! **Architecture**:
//! - `Stage`: Enum representing the discrete stages of the fixed pipeline
//! - `RunPhase`: Where the runner is within a cycle
//! - `RunState`: Struct tracking the current phase, timestamps and completed stages
//! - Transitions are validated so a full cycle can only move forward one stage at a time

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::SequenceError;

/// Stage enumeration - the fixed test-and-program pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Stage 1: Programmer reachability
    Connectivity,

    /// Stage 2: Populate device records for present sockets
    Detection,

    /// Stage 3: Bootstrap + test firmware download
    PretestDownload,

    /// Stage 4: Unique chip identifier read
    Identification,

    /// Stage 5: Analog rail check
    Voltage,

    /// Stage 6: Accelerometer, light sensor, DALI, GNSS, radio
    Peripherals,

    /// Stage 7: Fold facts into a verdict
    Completion,

    /// Stage 8: Production firmware download
    ProductionDownload,
}

impl Stage {
    /// Full-cycle order.
    pub const PIPELINE: [Stage; 8] = [
        Stage::Connectivity,
        Stage::Detection,
        Stage::PretestDownload,
        Stage::Identification,
        Stage::Voltage,
        Stage::Peripherals,
        Stage::Completion,
        Stage::ProductionDownload,
    ];

    /// Get the human-readable name for this stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Connectivity => "connectivity",
            Stage::Detection => "detection",
            Stage::PretestDownload => "pre-test download",
            Stage::Identification => "identification",
            Stage::Voltage => "voltage",
            Stage::Peripherals => "peripherals",
            Stage::Completion => "completion",
            Stage::ProductionDownload => "production download",
        }
    }

    /// Position within the pipeline.
    pub fn position(&self) -> usize {
        Stage::PIPELINE
            .iter()
            .position(|s| s == self)
            .unwrap_or(Stage::PIPELINE.len())
    }

    /// Stage that follows this one in a full cycle.
    pub fn next(&self) -> Option<Stage> {
        Stage::PIPELINE.get(self.position() + 1).copied()
    }
}

/// Where the runner is within a full cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    Running(Stage),
    Completed,
    Cancelled,
}

impl RunPhase {
    /// Check if a full cycle may move to `next` from this phase.
    pub fn can_transition_to(&self, next: Stage) -> bool {
        match self {
            RunPhase::Running(current) => current.next() == Some(next),
            _ => next == Stage::PIPELINE[0],
        }
    }
}

/// Run state snapshot for progress reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub phase: RunPhase,
    pub stages_completed: Vec<Stage>,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
}

impl Default for RunState {
    fn default() -> Self {
        RunState::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        RunState {
            phase: RunPhase::Idle,
            stages_completed: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Reset for a fresh full cycle.
    pub fn begin_cycle(&mut self) {
        self.phase = RunPhase::Idle;
        self.stages_completed.clear();
        self.started_at = Some(Local::now());
        self.finished_at = None;
    }

    /// Attempt to move the cycle to the next stage.
    pub fn transition_to(&mut self, next: Stage) -> Result<(), SequenceError> {
        if !self.phase.can_transition_to(next) {
            return Err(SequenceError::InvalidTransition {
                from: self.phase_name(),
                to: next.as_str().to_string(),
            });
        }
        if let RunPhase::Running(done) = self.phase {
            self.stages_completed.push(done);
        }
        self.phase = RunPhase::Running(next);
        Ok(())
    }

    pub fn finish(&mut self) {
        if let RunPhase::Running(done) = self.phase {
            self.stages_completed.push(done);
        }
        self.phase = RunPhase::Completed;
        self.finished_at = Some(Local::now());
    }

    pub fn cancel(&mut self) {
        self.phase = RunPhase::Cancelled;
        self.finished_at = Some(Local::now());
    }

    fn phase_name(&self) -> String {
        match self.phase {
            RunPhase::Idle => "idle".to_string(),
            RunPhase::Running(stage) => stage.as_str().to_string(),
            RunPhase::Completed => "completed".to_string(),
            RunPhase::Cancelled => "cancelled".to_string(),
        }
    }
}
