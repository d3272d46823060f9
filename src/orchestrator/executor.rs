//! Per-call execution helpers shared by every stage.
//!
//! - Individual timeouts around each capability call
//! - The availability predicate
//! - Failure recording (device record, fixture error log, console)
//! - Mirroring facts onto the fixture's property interface

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::completion::CompletionPolicy;
use super::table::DeviceTable;
use crate::bench::{FixtureController, HwResult};
use crate::config::BenchSettings;
use crate::error::HardwareError;
use crate::models::{DeviceKey, PropertyValue, SocketIndex};

/// Everything a stage needs besides the pair it runs on.
pub struct StageContext<'a> {
    pub settings: &'a BenchSettings,
    pub table: &'a DeviceTable,
    pub policy: CompletionPolicy,
}

impl<'a> StageContext<'a> {
    pub fn new(settings: &'a BenchSettings, table: &'a DeviceTable) -> Self {
        StageContext {
            settings,
            table,
            policy: CompletionPolicy::from_settings(settings),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.settings.call_timeout()
    }

    pub fn sockets(&self) -> impl Iterator<Item = SocketIndex> {
        SocketIndex::all(self.settings.slots_per_bank)
    }
}

/// Counters of one stage run, summed across pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTally {
    /// Sockets that passed the availability predicate.
    pub eligible: usize,
    /// Units of work that failed or were rejected.
    pub failed: usize,
    /// Devices skipped because earlier stages left them unusable.
    pub skipped: usize,
    /// Pairs skipped because their programmer is unreachable.
    pub unreachable_pairs: usize,
    /// Devices that received a verdict in this run.
    pub finalized: Vec<DeviceKey>,
}

impl StageTally {
    pub fn merge(&mut self, other: StageTally) {
        self.eligible += other.eligible;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.unreachable_pairs += other.unreachable_pairs;
        self.finalized.extend(other.finalized);
    }

    pub(crate) fn unreachable() -> Self {
        StageTally {
            unreachable_pairs: 1,
            ..StageTally::default()
        }
    }
}

/// Run one capability call under its own timeout.
pub async fn call<T, F>(timeout: Duration, name: &str, fut: F) -> HwResult<T>
where
    F: Future<Output = HwResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(HardwareError::Timeout {
            call: name.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Availability predicate: device present, then accepted upstream.
///
/// Acceptance is not queried for an empty socket. A failing query counts as
/// "not eligible" and is only logged at debug level.
pub async fn is_eligible(
    fixture: &mut dyn FixtureController,
    socket: SocketIndex,
    timeout: Duration,
) -> bool {
    match call(timeout, "is_device_available", fixture.is_device_available(socket)).await {
        Ok(true) => {}
        Ok(false) => return false,
        Err(e) => {
            log::debug!("[Bench] {} slot {}: availability query failed: {}", fixture.name(), socket, e);
            return false;
        }
    }

    match call(timeout, "is_device_accepted", fixture.is_device_accepted(socket)).await {
        Ok(accepted) => accepted,
        Err(e) => {
            log::debug!("[Bench] {} slot {}: acceptance query failed: {}", fixture.name(), socket, e);
            false
        }
    }
}

/// Record a user-facing error on the device and on the fixture, and log it.
pub async fn report_failure(
    ctx: &StageContext<'_>,
    fixture: &mut dyn FixtureController,
    key: DeviceKey,
    message: String,
) {
    log::error!("{}", message);
    ctx.table.update(key, |record| record.push_error(message.clone()));

    if let Err(e) = call(ctx.timeout(), "record_error", fixture.record_error(key.socket, &message)).await {
        log::debug!("[Bench] Could not append error to {} slot {}: {}", fixture.name(), key.socket, e);
    }
}

/// Mirror a fact onto the fixture's property interface.
pub async fn mirror_property(
    ctx: &StageContext<'_>,
    fixture: &mut dyn FixtureController,
    socket: SocketIndex,
    name: &str,
    value: PropertyValue,
) {
    if let Err(e) = call(ctx.timeout(), "set_property", fixture.set_property(socket, name, value)).await {
        log::debug!("[Bench] Could not set '{}' on {} slot {}: {}", name, fixture.name(), socket, e);
    }
}
