//! Sequence Orchestration: fixed 8-stage test-and-program pipeline
//! (Connectivity -> Detection -> Pre-test download -> Identification -> Voltage
//! -> Peripherals -> Completion -> Production download).
//!
//! Every stage is a barrier: it runs on all pairs (concurrently, one worker per
//! pair, when `parallel` is set) and the next stage starts only once all of
//! them are done. Cancellation is honoured at stage boundaries only, so
//! in-flight device work always reaches session close.

pub mod commands;
pub mod completion;
pub mod download;
pub mod executor;
pub mod stages;
pub mod state;
pub mod table;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex, RwLock};

pub use commands::{Action, CommandOutcome, CommandRegistry};
pub use completion::CompletionPolicy;
pub use executor::{StageContext, StageTally};
pub use stages::{Firmware, StageJob};
pub use state::{RunPhase, RunState, Stage};
pub use table::DeviceTable;

use crate::bench::Bench;
use crate::config::BenchSettings;
use crate::error::SequenceError;
use crate::models::{DeviceKey, DeviceRecord, DeviceState, Peripheral};
use crate::session::{DeviceReport, Session};

/// Progress notifications for an operator console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SequenceEvent {
    CycleStarted,
    StageStarted(Stage),
    StageFinished(Stage, StageTally),
    DeviceFinalized(DeviceReport),
    CycleFinished(CycleSummary),
    Cancelled(Stage),
    PowerStarted(bool),
    PowerFinished(bool, StageTally),
}

/// Outcome of one full cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub passed: usize,
    pub failed: usize,
    /// Records of this cycle that never reached a verdict.
    pub unfinished: usize,
    pub duration_ms: u64,
}

impl CycleSummary {
    /// Count verdicts of the devices finalized in this cycle only.
    fn from_records(records: &[DeviceRecord], finalized: &[DeviceKey], duration: Duration) -> Self {
        let mut summary = CycleSummary {
            duration_ms: duration.as_millis() as u64,
            ..CycleSummary::default()
        };
        for record in records {
            if !finalized.contains(&record.key) {
                summary.unfinished += 1;
                continue;
            }
            match record.state() {
                DeviceState::Passed => summary.passed += 1,
                DeviceState::Failed => summary.failed += 1,
                _ => summary.unfinished += 1,
            }
        }
        summary
    }
}

/// Drives stages across the bench.
pub struct SequenceRunner {
    bench: Arc<Bench>,
    settings: BenchSettings,
    table: DeviceTable,
    state: Arc<RwLock<RunState>>,
    /// Channel for sending progress events to the console
    events: Option<mpsc::Sender<SequenceEvent>>,
    /// Operator abort flag
    cancel_rx: watch::Receiver<bool>,
    session: Option<Arc<Mutex<Session>>>,
}

impl SequenceRunner {
    /// Create a runner over `bench`.
    ///
    /// # Examples
    /// ```ignore
    /// let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    /// let runner = SequenceRunner::new(Arc::new(bench), settings, cancel_rx);
    /// runner.run_full_cycle().await?;
    /// ```
    pub fn new(bench: Arc<Bench>, settings: BenchSettings, cancel_rx: watch::Receiver<bool>) -> Self {
        SequenceRunner {
            bench,
            settings,
            table: DeviceTable::new(),
            state: Arc::new(RwLock::new(RunState::new())),
            events: None,
            cancel_rx,
            session: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::Sender<SequenceEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Attach a session that receives a report for every finalized device.
    pub fn with_session(mut self, session: Arc<Mutex<Session>>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn settings(&self) -> &BenchSettings {
        &self.settings
    }

    pub fn table(&self) -> &DeviceTable {
        &self.table
    }

    pub async fn state_snapshot(&self) -> RunState {
        self.state.read().await.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    fn emit(&self, event: SequenceEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.try_send(event);
        }
    }

    fn check_cancelled(&self, before: Stage) -> Result<(), SequenceError> {
        self.check_cancelled_named(before.as_str())
    }

    fn check_cancelled_named(&self, before: &str) -> Result<(), SequenceError> {
        if self.is_cancelled() {
            return Err(SequenceError::Cancelled(before.to_string()));
        }
        Ok(())
    }

    /// Run `job` on every pair; returns when all pairs are done.
    async fn execute(&self, job: StageJob) -> StageTally {
        let ctx = StageContext::new(&self.settings, &self.table);
        log::info!("[Sequence] Starting {}", job.describe());

        let mut total = StageTally::default();
        if self.settings.parallel {
            let workers = self
                .bench
                .pairs()
                .map(|(index, pair)| stages::run_on_pair(&job, &ctx, index, pair));
            for tally in futures::future::join_all(workers).await {
                total.merge(tally);
            }
        } else {
            for (index, pair) in self.bench.pairs() {
                total.merge(stages::run_on_pair(&job, &ctx, index, pair).await);
            }
        }

        log::info!(
            "[Sequence] {} finished: {} eligible, {} failed, {} skipped, {} unreachable boards",
            job.describe(),
            total.eligible,
            total.failed,
            total.skipped,
            total.unreachable_pairs
        );

        if job == StageJob::Completion {
            self.publish_verdicts(&total).await;
        }
        total
    }

    /// Forward finalized devices to the session and the console.
    async fn publish_verdicts(&self, tally: &StageTally) {
        for key in &tally.finalized {
            let Some(record) = self.table.get(*key) else {
                continue;
            };
            let report = DeviceReport::from_record(&record);
            if let Some(ref session) = self.session {
                session.lock().await.log_device(report.clone());
            }
            self.emit(SequenceEvent::DeviceFinalized(report));
        }
    }

    /// Run a single pipeline stage on its own.
    pub async fn run_stage(&self, stage: Stage) -> Result<StageTally, SequenceError> {
        self.check_cancelled(stage)?;
        self.emit(SequenceEvent::StageStarted(stage));
        let tally = self.execute(StageJob::for_stage(stage, &self.settings)).await;
        self.emit(SequenceEvent::StageFinished(stage, tally.clone()));
        Ok(tally)
    }

    /// Run selected peripheral checks regardless of the configured toggles.
    pub async fn run_peripheral_checks(&self, list: &[Peripheral]) -> Result<StageTally, SequenceError> {
        self.check_cancelled(Stage::Peripherals)?;
        self.emit(SequenceEvent::StageStarted(Stage::Peripherals));
        let tally = self.execute(StageJob::Peripherals(list.to_vec())).await;
        self.emit(SequenceEvent::StageFinished(Stage::Peripherals, tally.clone()));
        Ok(tally)
    }

    /// Switch power of every eligible socket.
    pub async fn set_power(&self, on: bool) -> Result<StageTally, SequenceError> {
        let job = StageJob::Power(on);
        self.check_cancelled_named(&job.describe())?;
        self.emit(SequenceEvent::PowerStarted(on));
        let tally = self.execute(job).await;
        self.emit(SequenceEvent::PowerFinished(on, tally.clone()));
        Ok(tally)
    }

    /// Executes all 8 stages in order.
    pub async fn run_full_cycle(&self) -> Result<CycleSummary, SequenceError> {
        let started = tokio::time::Instant::now();
        self.state.write().await.begin_cycle();
        self.table.clear();
        self.emit(SequenceEvent::CycleStarted);
        crate::log_success!("Full cycle testing started on {} boards", self.bench.len());

        let mut finalized = Vec::new();
        for stage in Stage::PIPELINE {
            if let Err(e) = self.check_cancelled(stage) {
                self.state.write().await.cancel();
                self.emit(SequenceEvent::Cancelled(stage));
                log::error!("Full cycle testing cancelled before {}", stage.as_str());
                return Err(e);
            }

            self.state.write().await.transition_to(stage)?;
            self.emit(SequenceEvent::StageStarted(stage));
            let tally = self.execute(StageJob::for_stage(stage, &self.settings)).await;
            if stage == Stage::Completion {
                finalized = tally.finalized.clone();
            }
            self.emit(SequenceEvent::StageFinished(stage, tally));
        }

        self.state.write().await.finish();
        let summary = CycleSummary::from_records(&self.table.snapshot(), &finalized, started.elapsed());
        crate::log_success!(
            "Full cycle testing finished: {} passed, {} failed, {} unfinished",
            summary.passed,
            summary.failed,
            summary.unfinished
        );
        self.emit(SequenceEvent::CycleFinished(summary.clone()));
        Ok(summary)
    }
}
