//! Core data types for slotbench.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bank-local socket position, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SocketIndex(pub u32);

impl SocketIndex {
    /// All socket indices of a bank with `slots` sockets, in order.
    pub fn all(slots: u32) -> impl Iterator<Item = SocketIndex> {
        (1..=slots).map(SocketIndex)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SocketIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Global identity of a device: which pair of the bench, which socket.
///
/// Ordering is pair-major so the device table iterates bank by bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    pub pair: usize,
    pub socket: SocketIndex,
}

impl DeviceKey {
    pub fn new(pair: usize, socket: SocketIndex) -> Self {
        DeviceKey { pair, socket }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "board {} slot {}", self.pair + 1, self.socket)
    }
}

/// Value exchanged through the fixture's get/set-by-name property interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Text(s)
    }
}

/// Lifecycle of a device within one test cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    Untested,
    InProgress,
    Passed,
    Failed,
}

impl DeviceState {
    /// Numeric code written to the fixture's `state` property.
    pub fn code(&self) -> i64 {
        match self {
            DeviceState::Untested => 0,
            DeviceState::InProgress => 1,
            DeviceState::Passed => 2,
            DeviceState::Failed => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Untested => "untested",
            DeviceState::InProgress => "in progress",
            DeviceState::Passed => "passed",
            DeviceState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeviceState::Passed | DeviceState::Failed)
    }
}

/// On-board peripherals exercised by the test firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Peripheral {
    Accelerometer,
    LightSensor,
    Dali,
    Gnss,
    Radio,
}

impl Peripheral {
    /// Execution order of the peripheral stage.
    pub const ALL: [Peripheral; 5] = [
        Peripheral::Accelerometer,
        Peripheral::LightSensor,
        Peripheral::Dali,
        Peripheral::Gnss,
        Peripheral::Radio,
    ];

    /// Property name used at the fixture boundary.
    pub fn fact_name(&self) -> &'static str {
        match self {
            Peripheral::Accelerometer => "accelChecked",
            Peripheral::LightSensor => "lightSensChecked",
            Peripheral::Dali => "daliChecked",
            Peripheral::Gnss => "gnssChecked",
            Peripheral::Radio => "radioChecked",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Peripheral::Accelerometer => "accelerometer",
            Peripheral::LightSensor => "light sensor",
            Peripheral::Dali => "DALI",
            Peripheral::Gnss => "GNSS",
            Peripheral::Radio => "radio interface",
        }
    }
}

/// Typed per-device facts. `None` means the check was never attempted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFacts {
    pub id: Option<String>,
    pub voltage_checked: Option<bool>,
    pub light_sens_checked: Option<bool>,
    pub dali_checked: Option<bool>,
    pub accel_checked: Option<bool>,
    pub gnss_checked: Option<bool>,
    pub radio_checked: Option<bool>,
}

impl DeviceFacts {
    pub fn peripheral(&self, peripheral: Peripheral) -> Option<bool> {
        match peripheral {
            Peripheral::Accelerometer => self.accel_checked,
            Peripheral::LightSensor => self.light_sens_checked,
            Peripheral::Dali => self.dali_checked,
            Peripheral::Gnss => self.gnss_checked,
            Peripheral::Radio => self.radio_checked,
        }
    }

    pub fn set_peripheral(&mut self, peripheral: Peripheral, passed: bool) {
        let slot = match peripheral {
            Peripheral::Accelerometer => &mut self.accel_checked,
            Peripheral::LightSensor => &mut self.light_sens_checked,
            Peripheral::Dali => &mut self.dali_checked,
            Peripheral::Gnss => &mut self.gnss_checked,
            Peripheral::Radio => &mut self.radio_checked,
        };
        *slot = Some(passed);
    }

    /// True when the identification read produced a non-empty id.
    pub fn has_id(&self) -> bool {
        self.id.as_deref().map_or(false, |id| !id.is_empty())
    }

    fn any_recorded(&self) -> bool {
        self.id.is_some()
            || self.voltage_checked.is_some()
            || Peripheral::ALL.iter().any(|p| self.peripheral(*p).is_some())
    }
}

/// Per-socket test state for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub key: DeviceKey,
    /// Operator-facing device number, when the fixture or settings provide one.
    pub dut_number: Option<u32>,
    pub facts: DeviceFacts,
    /// Outcome of the pre-test firmware download in this cycle.
    pub firmware_loaded: Option<bool>,
    pub errors: Vec<String>,
    verdict: Option<DeviceState>,
}

impl DeviceRecord {
    pub fn new(key: DeviceKey) -> Self {
        DeviceRecord {
            key,
            dut_number: None,
            facts: DeviceFacts::default(),
            firmware_loaded: None,
            errors: Vec::new(),
            verdict: None,
        }
    }

    pub fn with_dut_number(mut self, number: Option<u32>) -> Self {
        self.dut_number = number;
        self
    }

    /// Current lifecycle state; terminal states come only from the verdict.
    pub fn state(&self) -> DeviceState {
        match self.verdict {
            Some(verdict) => verdict,
            None if self.facts.any_recorded()
                || self.firmware_loaded.is_some()
                || !self.errors.is_empty() =>
            {
                DeviceState::InProgress
            }
            None => DeviceState::Untested,
        }
    }

    /// Devices whose test firmware failed to load are not exercised further.
    pub fn firmware_failed(&self) -> bool {
        self.firmware_loaded == Some(false)
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Display label: the device number when known, otherwise the key.
    pub fn label(&self) -> String {
        match self.dut_number {
            Some(no) => format!("DUT {}", no),
            None => self.key.to_string(),
        }
    }

    pub(crate) fn set_verdict(&mut self, verdict: DeviceState) {
        debug_assert!(verdict.is_terminal());
        self.verdict = Some(verdict);
    }
}
