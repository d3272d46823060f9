//! Operator command registry.
//!
//! Every stage and the full pipeline are exposed as named actions that take no
//! parameters beyond the bench the runner was built with.

use serde::{Deserialize, Serialize};

use super::{CycleSummary, SequenceRunner, Stage, StageTally};
use crate::config::BenchSettings;
use crate::error::SequenceError;
use crate::models::Peripheral;

pub const FULL_CYCLE: &str = "Full cycle testing";

/// What a registry entry does when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    FullCycle,
    Stage(Stage),
    Peripheral(Peripheral),
    PowerOn,
    PowerOff,
}

/// Result of running one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    Cycle(CycleSummary),
    Stage(StageTally),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEntry {
    pub name: &'static str,
    pub action: Action,
}

/// Ordered list of named actions offered to the operator.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    entries: Vec<CommandEntry>,
}

impl CommandRegistry {
    /// Registry for the given settings; disabled GNSS/radio checks are not listed.
    pub fn for_settings(settings: &BenchSettings) -> Self {
        let mut entries = vec![
            CommandEntry { name: FULL_CYCLE, action: Action::FullCycle },
            CommandEntry { name: "Test connection to programmer", action: Action::Stage(Stage::Connectivity) },
            CommandEntry { name: "Detect DUTs", action: Action::Stage(Stage::Detection) },
            CommandEntry { name: "Download test firmware", action: Action::Stage(Stage::PretestDownload) },
            CommandEntry { name: "Supply power to DUTs", action: Action::PowerOn },
            CommandEntry { name: "Power off DUTs", action: Action::PowerOff },
            CommandEntry {
                name: "Read unique device identifiers (ID)",
                action: Action::Stage(Stage::Identification),
            },
            CommandEntry { name: "Check voltage on AIN 1 (3.3V)", action: Action::Stage(Stage::Voltage) },
            CommandEntry { name: "Test accelerometer", action: Action::Peripheral(Peripheral::Accelerometer) },
            CommandEntry { name: "Test light sensor", action: Action::Peripheral(Peripheral::LightSensor) },
            CommandEntry { name: "Test DALI", action: Action::Peripheral(Peripheral::Dali) },
        ];

        if settings.gnss.enabled {
            entries.push(CommandEntry { name: "Test GNSS", action: Action::Peripheral(Peripheral::Gnss) });
        }
        if settings.radio.enabled {
            entries.push(CommandEntry {
                name: "Test radio interface",
                action: Action::Peripheral(Peripheral::Radio),
            });
        }

        entries.push(CommandEntry { name: "Check testing completion", action: Action::Stage(Stage::Completion) });
        entries.push(CommandEntry { name: "Download software", action: Action::Stage(Stage::ProductionDownload) });

        CommandRegistry { entries }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    pub fn entries(&self) -> &[CommandEntry] {
        &self.entries
    }

    /// Case-insensitive lookup by name.
    pub fn find(&self, name: &str) -> Option<Action> {
        let wanted = name.trim();
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(wanted))
            .map(|e| e.action)
    }

    /// Run the named command.
    pub async fn run(&self, runner: &SequenceRunner, name: &str) -> Result<CommandOutcome, SequenceError> {
        let action = self
            .find(name)
            .ok_or_else(|| SequenceError::UnknownCommand(name.to_string()))?;
        log::info!("[Command] Running '{}'", name.trim());

        match action {
            Action::FullCycle => runner.run_full_cycle().await.map(CommandOutcome::Cycle),
            Action::Stage(stage) => runner.run_stage(stage).await.map(CommandOutcome::Stage),
            Action::Peripheral(peripheral) => runner
                .run_peripheral_checks(&[peripheral])
                .await
                .map(CommandOutcome::Stage),
            Action::PowerOn => runner.set_power(true).await.map(CommandOutcome::Stage),
            Action::PowerOff => runner.set_power(false).await.map(CommandOutcome::Stage),
        }
    }
}
