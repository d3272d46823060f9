//! Completion evaluation: fold accumulated facts into a terminal verdict.

use serde::{Deserialize, Serialize};

use super::executor::{call, is_eligible, mirror_property, StageContext, StageTally};
use crate::bench::BenchPair;
use crate::config::BenchSettings;
use crate::models::{DeviceFacts, DeviceKey, DeviceState, PropertyValue};

/// Which facts are required for a device to pass.
///
/// id, voltage, light sensor, DALI and accelerometer are always required;
/// GNSS and radio only when configured as gating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionPolicy {
    pub require_gnss: bool,
    pub require_radio: bool,
}

impl CompletionPolicy {
    pub fn from_settings(settings: &BenchSettings) -> Self {
        CompletionPolicy {
            require_gnss: settings.gnss.gating,
            require_radio: settings.radio.gating,
        }
    }

    /// Pure verdict over recorded facts. Missing facts count as failed.
    pub fn evaluate(&self, facts: &DeviceFacts) -> DeviceState {
        let passed = |fact: Option<bool>| fact == Some(true);

        let required = facts.has_id()
            && passed(facts.voltage_checked)
            && passed(facts.light_sens_checked)
            && passed(facts.dali_checked)
            && passed(facts.accel_checked)
            && (!self.require_gnss || passed(facts.gnss_checked))
            && (!self.require_radio || passed(facts.radio_checked));

        if required {
            DeviceState::Passed
        } else {
            DeviceState::Failed
        }
    }
}

/// Completion stage for one pair.
///
/// Sets the verdict of every eligible socket, mirrors it as the fixture's
/// `state` property and reports the socket fully tested exactly once,
/// whatever the outcome. A device whose test firmware did not load is Failed
/// even if facts it still holds would pass.
pub async fn evaluate_pair(ctx: &StageContext<'_>, index: usize, pair: &BenchPair) -> StageTally {
    let mut tally = StageTally::default();
    let mut handles = pair.lock().await;

    for socket in ctx.sockets() {
        if !is_eligible(handles.fixture.as_mut(), socket, ctx.timeout()).await {
            continue;
        }
        tally.eligible += 1;

        let key = DeviceKey::new(index, socket);
        ctx.table.ensure(key, pair.dut_number(socket.get()));
        let verdict = ctx.table.update(key, |record| {
            let verdict = if record.firmware_failed() {
                DeviceState::Failed
            } else {
                ctx.policy.evaluate(&record.facts)
            };
            record.set_verdict(verdict);
            verdict
        });

        let label = ctx.table.label(key);
        match verdict {
            DeviceState::Passed => crate::log_success!("{} passed all required checks", label),
            _ => {
                tally.failed += 1;
                log::error!("{} failed testing", label);
            }
        }

        mirror_property(
            ctx,
            handles.fixture.as_mut(),
            socket,
            "state",
            PropertyValue::Int(verdict.code()),
        )
        .await;

        if let Err(e) = call(
            ctx.timeout(),
            "report_socket_fully_tested",
            handles.fixture.report_socket_fully_tested(socket),
        )
        .await
        {
            log::error!("[Bench] Could not report {} as fully tested: {}", label, e);
        }

        tally.finalized.push(key);
    }

    tally
}
