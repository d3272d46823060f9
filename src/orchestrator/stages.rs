//! Stage functions.
//!
//! Each stage visits every socket of a pair in order, applies the availability
//! predicate and performs one unit of work per eligible socket. A per-device
//! failure is recorded and the loop moves on; nothing here returns an error.

use super::completion::evaluate_pair;
use super::download::program_socket;
use super::executor::{call, is_eligible, mirror_property, report_failure, StageContext, StageTally};
use super::state::Stage;
use crate::bench::{BenchPair, PairHandles};
use crate::config::BenchSettings;
use crate::error::HardwareError;
use crate::models::{DeviceKey, Peripheral, PropertyValue, SocketIndex};

/// Which firmware a download stage writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firmware {
    /// Bootstrap + test firmware used by the qualification stages.
    Pretest,
    /// Final production image.
    Production,
}

/// One unit of stage work, as run on each pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageJob {
    Connectivity,
    Detection,
    Download(Firmware),
    Identification,
    Voltage,
    Peripherals(Vec<Peripheral>),
    Completion,
    Power(bool),
}

impl StageJob {
    /// Job run for a pipeline stage under the given settings.
    pub fn for_stage(stage: Stage, settings: &BenchSettings) -> Self {
        match stage {
            Stage::Connectivity => StageJob::Connectivity,
            Stage::Detection => StageJob::Detection,
            Stage::PretestDownload => StageJob::Download(Firmware::Pretest),
            Stage::Identification => StageJob::Identification,
            Stage::Voltage => StageJob::Voltage,
            Stage::Peripherals => StageJob::Peripherals(settings.enabled_peripherals()),
            Stage::Completion => StageJob::Completion,
            Stage::ProductionDownload => StageJob::Download(Firmware::Production),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            StageJob::Connectivity => "connectivity check".to_string(),
            StageJob::Detection => "device detection".to_string(),
            StageJob::Download(Firmware::Pretest) => "test firmware download".to_string(),
            StageJob::Download(Firmware::Production) => "production firmware download".to_string(),
            StageJob::Identification => "identification read".to_string(),
            StageJob::Voltage => "voltage check".to_string(),
            StageJob::Peripherals(list) => {
                let names: Vec<&str> = list.iter().map(|p| p.label()).collect();
                format!("peripheral checks ({})", names.join(", "))
            }
            StageJob::Completion => "completion evaluation".to_string(),
            StageJob::Power(true) => "power on".to_string(),
            StageJob::Power(false) => "power off".to_string(),
        }
    }
}

/// Run `job` on one pair.
pub async fn run_on_pair(job: &StageJob, ctx: &StageContext<'_>, index: usize, pair: &BenchPair) -> StageTally {
    if *job != StageJob::Connectivity && ctx.table.is_unreachable(index) {
        log::debug!(
            "[Stage] Skipping {} on {}: programmer {} unreachable",
            job.describe(),
            pair.fixture_name(),
            pair.programmer_serial()
        );
        return StageTally::unreachable();
    }

    match job {
        StageJob::Connectivity => connectivity(ctx, index, pair).await,
        StageJob::Detection => detection(ctx, index, pair).await,
        StageJob::Download(firmware) => download(ctx, index, pair, *firmware).await,
        StageJob::Identification => identification(ctx, index, pair).await,
        StageJob::Voltage => voltage(ctx, index, pair).await,
        StageJob::Peripherals(list) => peripherals(ctx, index, pair, list).await,
        StageJob::Completion => evaluate_pair(ctx, index, pair).await,
        StageJob::Power(on) => power(ctx, pair, *on).await,
    }
}

async fn connectivity(ctx: &StageContext<'_>, index: usize, pair: &BenchPair) -> StageTally {
    let mut handles = pair.lock().await;
    let serial = handles.programmer.serial();

    match call(ctx.timeout(), "test_connection", handles.programmer.test_connection()).await {
        Ok(()) => {
            ctx.table.set_reachable(index, true);
            crate::log_success!("Connection to programmer {} established", serial);
            StageTally::default()
        }
        Err(e) => {
            ctx.table.set_reachable(index, false);
            log::error!(
                "Programmer {} of {} is unreachable, board skipped for this cycle: {}",
                serial,
                pair.fixture_name(),
                e
            );
            StageTally::unreachable()
        }
    }
}

async fn detection(ctx: &StageContext<'_>, index: usize, pair: &BenchPair) -> StageTally {
    let mut tally = StageTally::default();
    let mut handles = pair.lock().await;

    if let Err(e) = call(ctx.timeout(), "detect_devices", handles.fixture.detect_devices()).await {
        log::error!("Device detection failed on {}: {}", pair.fixture_name(), e);
        tally.failed += 1;
        return tally;
    }

    ctx.table.reset_pair(index);

    for socket in ctx.sockets() {
        if !is_eligible(handles.fixture.as_mut(), socket, ctx.timeout()).await {
            continue;
        }
        tally.eligible += 1;

        let number = device_number(ctx, &mut handles, socket)
            .await
            .or_else(|| pair.dut_number(socket.get()));
        ctx.table.ensure(DeviceKey::new(index, socket), number);

        let label = ctx.table.label(DeviceKey::new(index, socket));
        log::info!("{} detected on {} slot {}", label, pair.fixture_name(), socket);
    }

    tally
}

/// Device number reported by the fixture, if any.
async fn device_number(ctx: &StageContext<'_>, handles: &mut PairHandles, socket: SocketIndex) -> Option<u32> {
    match call(ctx.timeout(), "get_property", handles.fixture.get_property(socket, "no")).await {
        Ok(Some(value)) => value.as_int().and_then(|n| u32::try_from(n).ok()),
        Ok(None) => None,
        Err(e) => {
            log::debug!("[Stage] No device number for slot {}: {}", socket, e);
            None
        }
    }
}

async fn download(ctx: &StageContext<'_>, index: usize, pair: &BenchPair, firmware: Firmware) -> StageTally {
    let mut tally = StageTally::default();
    let mut handles = pair.lock().await;
    let settings = ctx.settings;

    let images = match firmware {
        Firmware::Pretest => vec![&settings.bootstrap_image, &settings.test_firmware_image],
        Firmware::Production => vec![&settings.production_image],
    };

    for socket in ctx.sockets() {
        if !is_eligible(handles.fixture.as_mut(), socket, ctx.timeout()).await {
            continue;
        }
        tally.eligible += 1;

        let key = DeviceKey::new(index, socket);
        ctx.table.ensure(key, pair.dut_number(socket.get()));
        let label = ctx.table.label(key);

        let outcome = program_socket(&mut handles, settings, socket, &images).await;
        if firmware == Firmware::Pretest {
            let loaded = outcome.is_ok();
            ctx.table.update(key, |record| record.firmware_loaded = Some(loaded));
        }

        match outcome {
            Ok(()) => match firmware {
                Firmware::Pretest => crate::log_success!("Test firmware downloaded to {}", label),
                Firmware::Production => crate::log_success!("Production firmware downloaded to {}", label),
            },
            Err(e) => {
                tally.failed += 1;
                report_failure(
                    ctx,
                    handles.fixture.as_mut(),
                    key,
                    format!("Firmware download failed for {}: {}", label, e),
                )
                .await;
            }
        }
    }

    tally
}

/// Eligible device whose test firmware never loaded: later checks are not attempted.
fn firmware_missing(ctx: &StageContext<'_>, key: DeviceKey) -> bool {
    ctx.table.get(key).map_or(false, |record| record.firmware_failed())
}

async fn identification(ctx: &StageContext<'_>, index: usize, pair: &BenchPair) -> StageTally {
    let mut tally = StageTally::default();
    let mut handles = pair.lock().await;

    for socket in ctx.sockets() {
        if !is_eligible(handles.fixture.as_mut(), socket, ctx.timeout()).await {
            continue;
        }
        tally.eligible += 1;

        let key = DeviceKey::new(index, socket);
        if firmware_missing(ctx, key) {
            tally.skipped += 1;
            continue;
        }
        ctx.table.ensure(key, pair.dut_number(socket.get()));
        let label = ctx.table.label(key);

        let id = call(ctx.timeout(), "read_chip_id", handles.fixture.read_chip_id(socket))
            .await
            .and_then(|id| match id.trim() {
                "" => Err(HardwareError::EmptyResponse("read_chip_id".to_string())),
                id => Ok(id.to_string()),
            });

        let value = id.as_ref().ok().cloned().unwrap_or_default();
        ctx.table.update(key, |record| record.facts.id = Some(value.clone()));
        mirror_property(ctx, handles.fixture.as_mut(), socket, "id", PropertyValue::Text(value)).await;

        match id {
            Ok(id) => crate::log_success!("Unique ID {} read for {}", id, label),
            Err(e) => {
                tally.failed += 1;
                report_failure(
                    ctx,
                    handles.fixture.as_mut(),
                    key,
                    format!("Unique ID could not be read for {}: {}", label, e),
                )
                .await;
            }
        }
    }

    tally
}

async fn voltage(ctx: &StageContext<'_>, index: usize, pair: &BenchPair) -> StageTally {
    let mut tally = StageTally::default();
    let mut handles = pair.lock().await;
    let band = &ctx.settings.voltage;

    for socket in ctx.sockets() {
        if !is_eligible(handles.fixture.as_mut(), socket, ctx.timeout()).await {
            continue;
        }
        tally.eligible += 1;

        let key = DeviceKey::new(index, socket);
        if firmware_missing(ctx, key) {
            tally.skipped += 1;
            continue;
        }
        ctx.table.ensure(key, pair.dut_number(socket.get()));
        let label = ctx.table.label(key);

        let reading = call(
            ctx.timeout(),
            "read_analog_input",
            handles.fixture.read_analog_input(socket, band.channel, band.range_hint),
        )
        .await;

        let accepted = match reading {
            Ok(raw) if band.accepts(raw) => true,
            Ok(raw) => {
                log::debug!("Error voltage value on AIN {} : {}.", band.channel, raw);
                false
            }
            Err(ref e) => {
                log::debug!("Voltage read on AIN {} for {} failed: {}", band.channel, label, e);
                false
            }
        };

        ctx.table.update(key, |record| record.facts.voltage_checked = Some(accepted));
        mirror_property(ctx, handles.fixture.as_mut(), socket, "voltageChecked", accepted.into()).await;

        if accepted {
            crate::log_success!("Voltage ({}) on AIN {} for {} checked.", band.label, band.channel, label);
        } else {
            tally.failed += 1;
            report_failure(
                ctx,
                handles.fixture.as_mut(),
                key,
                format!("Error voltage value on AIN {} detected! {}", band.channel, label),
            )
            .await;
        }
    }

    tally
}

async fn peripherals(ctx: &StageContext<'_>, index: usize, pair: &BenchPair, list: &[Peripheral]) -> StageTally {
    let mut tally = StageTally::default();
    let mut handles = pair.lock().await;

    for peripheral in list {
        for socket in ctx.sockets() {
            if !is_eligible(handles.fixture.as_mut(), socket, ctx.timeout()).await {
                continue;
            }
            tally.eligible += 1;

            let key = DeviceKey::new(index, socket);
            if firmware_missing(ctx, key) {
                tally.skipped += 1;
                continue;
            }
            ctx.table.ensure(key, pair.dut_number(socket.get()));
            let label = ctx.table.label(key);

            let passed = match call(
                ctx.timeout(),
                "check_peripheral",
                handles.fixture.check_peripheral(socket, *peripheral),
            )
            .await
            {
                Ok(passed) => passed,
                Err(e) => {
                    log::debug!("[Stage] {} check on {} failed: {}", peripheral.label(), label, e);
                    false
                }
            };

            ctx.table.update(key, |record| record.facts.set_peripheral(*peripheral, passed));
            mirror_property(ctx, handles.fixture.as_mut(), socket, peripheral.fact_name(), passed.into()).await;

            if passed {
                crate::log_success!("{} of {} checked", peripheral.label(), label);
            } else {
                tally.failed += 1;
                report_failure(
                    ctx,
                    handles.fixture.as_mut(),
                    key,
                    format!("Error testing {} of {}", peripheral.label(), label),
                )
                .await;
            }
        }
    }

    tally
}

async fn power(ctx: &StageContext<'_>, pair: &BenchPair, on: bool) -> StageTally {
    let mut tally = StageTally::default();
    let mut handles = pair.lock().await;

    for socket in ctx.sockets() {
        if !is_eligible(handles.fixture.as_mut(), socket, ctx.timeout()).await {
            continue;
        }
        tally.eligible += 1;

        let result = if on {
            call(ctx.timeout(), "power_on", handles.fixture.power_on(socket)).await
        } else {
            call(ctx.timeout(), "power_off", handles.fixture.power_off(socket)).await
        };

        if let Err(e) = result {
            tally.failed += 1;
            log::error!("Power {} failed on {} slot {}: {}", if on { "on" } else { "off" }, pair.fixture_name(), socket, e);
        }
    }

    tally
}
