//! slotbench: multi-slot test bench orchestration
//!
//! Drives a bench of paired fixture controllers and SWD programmers through a
//! fixed qualification pipeline (connectivity, detection, test firmware,
//! identification, voltage, peripherals, completion, production firmware) and
//! keeps a per-device record of every outcome.
//!
//! The system is organized into functional modules:
//! - **error**: Error type hierarchy
//! - **models**: Device keys, facts, records and verdict states
//! - **bench**: Hardware seams (fixture, programmer), pairing and the simulated bench
//! - **config**: Bench settings, validation and persistence
//! - **orchestrator**: Stage execution, completion policy and the command registry
//! - **session**: Operator/batch session and device reports
//! - **log_collector**: Log routing to disk and console

pub mod error;
pub mod models;

pub mod bench;
pub mod config;

pub mod orchestrator;
pub mod session;

// Decoupled logging pipeline
pub mod log_collector;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::{LogCollector, LogLine};

pub use bench::{Bench, BenchPair, FixtureController, ProgrammerLink};
pub use config::{BenchSettings, SettingsManager};
pub use error::{AppError, ConfigError, HardwareError, Result, SequenceError};
pub use models::{DeviceKey, DeviceRecord, DeviceState, Peripheral, SocketIndex};
pub use orchestrator::{CommandRegistry, CycleSummary, SequenceEvent, SequenceRunner, Stage};
pub use session::{DeviceReport, Session};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
