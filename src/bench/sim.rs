//! Simulated fixture controllers and programmer links.
//!
//! Used by the operator CLI when no hardware drivers are linked in, and by the
//! test suite. Every call is appended to a shared [`CallJournal`] so tests can
//! assert on exactly which hardware operations were issued, and in what order.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use super::{FixtureController, HwResult, ProgrammerLink};
use crate::error::HardwareError;
use crate::models::{Peripheral, PropertyValue, SocketIndex};

/// One observed capability call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Fixture name or programmer serial.
    pub device: String,
    pub call: String,
    pub socket: Option<SocketIndex>,
    pub detail: Option<String>,
}

/// Shared, ordered log of every simulated call across the whole bench.
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    records: Arc<Mutex<Vec<CallRecord>>>,
}

impl CallJournal {
    pub fn record(&self, device: &str, call: &str, socket: Option<SocketIndex>, detail: Option<String>) {
        if let Ok(mut records) = self.records.lock() {
            records.push(CallRecord {
                device: device.to_string(),
                call: call.to_string(),
                socket,
                detail,
            });
        }
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }

    /// Number of `call` invocations on any device.
    pub fn count(&self, call: &str) -> usize {
        self.records().iter().filter(|r| r.call == call).count()
    }

    /// Number of `call` invocations on one device for one socket.
    pub fn count_for(&self, device: &str, call: &str, socket: SocketIndex) -> usize {
        self.records()
            .iter()
            .filter(|r| r.device == device && r.call == call && r.socket == Some(socket))
            .count()
    }

    /// Distinct call names issued against one socket of one device.
    pub fn calls_for_socket(&self, device: &str, socket: SocketIndex) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|r| r.device == device && r.socket == Some(socket))
            .map(|r| r.call)
            .collect()
    }

    /// Call names issued on one device, in order.
    pub fn calls_for_device(&self, device: &str) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|r| r.device == device)
            .map(|r| r.call)
            .collect()
    }
}

/// Fault set shared between simulated devices and the code driving them.
///
/// Clones share one set, so faults can be injected or healed between cycles
/// while the bench is in use.
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    calls: Arc<Mutex<HashSet<String>>>,
}

impl SimFaults {
    pub fn inject(&self, call: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.insert(call.to_string());
        }
    }

    pub fn heal(&self, call: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.remove(call);
        }
    }

    pub fn contains(&self, call: &str) -> bool {
        self.calls.lock().map(|c| c.contains(call)).unwrap_or(false)
    }
}

/// Scripted behavior of one simulated socket.
#[derive(Debug, Clone)]
pub struct SimSocket {
    pub present: bool,
    pub accepted: bool,
    /// Raw ADC reading returned for any analog channel.
    pub voltage: i64,
    pub chip_id: String,
    pub peripherals: HashMap<Peripheral, bool>,
    /// Calls that fail with a simulated fault.
    pub faults: HashSet<String>,
    /// Calls that never complete.
    pub hangs: HashSet<String>,
}

impl SimSocket {
    /// A populated, accepted device that passes every check.
    pub fn healthy(chip_id: &str) -> Self {
        SimSocket {
            present: true,
            accepted: true,
            voltage: 71_000,
            chip_id: chip_id.to_string(),
            peripherals: Peripheral::ALL.iter().map(|p| (*p, true)).collect(),
            faults: HashSet::new(),
            hangs: HashSet::new(),
        }
    }

    pub fn empty() -> Self {
        SimSocket {
            present: false,
            accepted: false,
            ..SimSocket::healthy("")
        }
    }

    pub fn not_accepted(chip_id: &str) -> Self {
        SimSocket {
            accepted: false,
            ..SimSocket::healthy(chip_id)
        }
    }

    pub fn with_voltage(mut self, raw: i64) -> Self {
        self.voltage = raw;
        self
    }

    pub fn with_peripheral(mut self, peripheral: Peripheral, passes: bool) -> Self {
        self.peripherals.insert(peripheral, passes);
        self
    }

    pub fn with_fault(mut self, call: &str) -> Self {
        self.faults.insert(call.to_string());
        self
    }

    pub fn with_hang(mut self, call: &str) -> Self {
        self.hangs.insert(call.to_string());
        self
    }
}

/// How long a hanging simulated call blocks; far beyond any call timeout.
const HANG: Duration = Duration::from_secs(24 * 3600);

/// Simulated fixture controller.
pub struct SimFixture {
    name: String,
    journal: CallJournal,
    sockets: HashMap<u32, SimSocket>,
    properties: HashMap<(u32, String), PropertyValue>,
    faults: SimFaults,
}

impl SimFixture {
    pub fn new(name: impl Into<String>, journal: CallJournal) -> Self {
        SimFixture {
            name: name.into(),
            journal,
            sockets: HashMap::new(),
            properties: HashMap::new(),
            faults: SimFaults::default(),
        }
    }

    /// Fixture-wide faults, applied to every socket and to detection.
    pub fn with_faults(mut self, faults: SimFaults) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_socket(mut self, socket: u32, script: SimSocket) -> Self {
        self.sockets.insert(socket, script);
        self
    }

    /// Pre-seed a property, e.g. the device number the fixture reports.
    pub fn with_property(mut self, socket: u32, name: &str, value: PropertyValue) -> Self {
        self.properties.insert((socket, name.to_string()), value);
        self
    }

    fn socket(&self, socket: SocketIndex) -> SimSocket {
        self.sockets
            .get(&socket.get())
            .cloned()
            .unwrap_or_else(SimSocket::empty)
    }

    async fn enter(&self, call: &str, socket: SocketIndex, detail: Option<String>) -> HwResult<SimSocket> {
        self.journal.record(&self.name, call, Some(socket), detail);
        tokio::task::yield_now().await;

        let script = self.socket(socket);
        if script.hangs.contains(call) {
            tokio::time::sleep(HANG).await;
        }
        if script.faults.contains(call) || self.faults.contains(call) {
            return Err(HardwareError::failed(call, "simulated fixture fault"));
        }
        Ok(script)
    }
}

impl FixtureController for SimFixture {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn detect_devices(&mut self) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(async move {
            self.journal.record(&self.name, "detect_devices", None, None);
            tokio::task::yield_now().await;
            if self.faults.contains("detect_devices") {
                return Err(HardwareError::failed("detect_devices", "simulated fixture fault"));
            }
            Ok(())
        })
    }

    fn is_device_available(&mut self, socket: SocketIndex) -> BoxFuture<'_, HwResult<bool>> {
        Box::pin(async move { Ok(self.enter("is_device_available", socket, None).await?.present) })
    }

    fn is_device_accepted(&mut self, socket: SocketIndex) -> BoxFuture<'_, HwResult<bool>> {
        Box::pin(async move { Ok(self.enter("is_device_accepted", socket, None).await?.accepted) })
    }

    fn power_on(&mut self, socket: SocketIndex) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(async move { self.enter("power_on", socket, None).await.map(|_| ()) })
    }

    fn power_off(&mut self, socket: SocketIndex) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(async move { self.enter("power_off", socket, None).await.map(|_| ()) })
    }

    fn route_debug_lines(&mut self, socket: SocketIndex) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(async move { self.enter("route_debug_lines", socket, None).await.map(|_| ()) })
    }

    fn read_analog_input(
        &mut self,
        socket: SocketIndex,
        channel: u32,
        range_hint: u32,
    ) -> BoxFuture<'_, HwResult<i64>> {
        let detail = format!("ain{} range{}", channel, range_hint);
        Box::pin(async move { Ok(self.enter("read_analog_input", socket, Some(detail)).await?.voltage) })
    }

    fn read_chip_id(&mut self, socket: SocketIndex) -> BoxFuture<'_, HwResult<String>> {
        Box::pin(async move { Ok(self.enter("read_chip_id", socket, None).await?.chip_id) })
    }

    fn check_peripheral(
        &mut self,
        socket: SocketIndex,
        peripheral: Peripheral,
    ) -> BoxFuture<'_, HwResult<bool>> {
        Box::pin(async move {
            let script = self
                .enter("check_peripheral", socket, Some(peripheral.fact_name().to_string()))
                .await?;
            Ok(script.peripherals.get(&peripheral).copied().unwrap_or(false))
        })
    }

    fn get_property(
        &mut self,
        socket: SocketIndex,
        name: &str,
    ) -> BoxFuture<'_, HwResult<Option<PropertyValue>>> {
        let name = name.to_string();
        Box::pin(async move {
            self.enter("get_property", socket, Some(name.clone())).await?;
            Ok(self.properties.get(&(socket.get(), name)).cloned())
        })
    }

    fn set_property(
        &mut self,
        socket: SocketIndex,
        name: &str,
        value: PropertyValue,
    ) -> BoxFuture<'_, HwResult<()>> {
        let name = name.to_string();
        Box::pin(async move {
            let detail = format!("{}={:?}", name, value);
            self.enter("set_property", socket, Some(detail)).await?;
            self.properties.insert((socket.get(), name), value);
            Ok(())
        })
    }

    fn record_error(&mut self, socket: SocketIndex, message: &str) -> BoxFuture<'_, HwResult<()>> {
        let message = message.to_string();
        Box::pin(async move { self.enter("record_error", socket, Some(message)).await.map(|_| ()) })
    }

    fn report_socket_fully_tested(&mut self, socket: SocketIndex) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(async move {
            self.enter("report_socket_fully_tested", socket, None)
                .await
                .map(|_| ())
        })
    }
}

/// Simulated programmer link.
pub struct SimProgrammer {
    serial: String,
    journal: CallJournal,
    reachable: bool,
    faults: SimFaults,
    hangs: HashSet<String>,
    session_open: bool,
}

impl SimProgrammer {
    pub fn new(serial: impl Into<String>, journal: CallJournal) -> Self {
        SimProgrammer {
            serial: serial.into(),
            journal,
            reachable: true,
            faults: SimFaults::default(),
            hangs: HashSet::new(),
            session_open: false,
        }
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Fail every invocation of `call` (e.g. "open", "connect").
    pub fn with_fault(self, call: &str) -> Self {
        self.faults.inject(call);
        self
    }

    /// Share a fault set with the caller instead of a private one.
    pub fn with_faults(mut self, faults: SimFaults) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_hang(mut self, call: &str) -> Self {
        self.hangs.insert(call.to_string());
        self
    }

    async fn enter(&mut self, call: &str, detail: Option<String>) -> HwResult<()> {
        self.journal.record(&self.serial, call, None, detail);
        tokio::task::yield_now().await;

        if !self.reachable {
            return Err(HardwareError::Unreachable(self.serial.clone()));
        }
        if self.hangs.contains(call) {
            tokio::time::sleep(HANG).await;
        }
        if self.faults.contains(call) {
            return Err(HardwareError::failed(call, "simulated programmer fault"));
        }
        if call != "test_connection" && call != "select_by_usb" && call != "open" && !self.session_open {
            return Err(HardwareError::failed(call, "no open session"));
        }
        match call {
            "open" => self.session_open = true,
            "close" => self.session_open = false,
            _ => {}
        }
        Ok(())
    }
}

impl ProgrammerLink for SimProgrammer {
    fn serial(&self) -> String {
        self.serial.clone()
    }

    fn test_connection(&mut self) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(self.enter("test_connection", None))
    }

    fn select_by_usb(&mut self) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(self.enter("select_by_usb", None))
    }

    fn open(&mut self) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(self.enter("open", None))
    }

    fn set_device(&mut self, part: &str) -> BoxFuture<'_, HwResult<()>> {
        let part = part.to_string();
        Box::pin(async move { self.enter("set_device", Some(part)).await })
    }

    fn select(&mut self) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(self.enter("select", None))
    }

    fn set_speed(&mut self, khz: u32) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(async move { self.enter("set_speed", Some(khz.to_string())).await })
    }

    fn connect(&mut self) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(self.enter("connect", None))
    }

    fn erase(&mut self) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(self.enter("erase", None))
    }

    fn download_file(&mut self, path: &str, offset: u32) -> BoxFuture<'_, HwResult<()>> {
        let detail = format!("{}@{:#x}", path, offset);
        Box::pin(async move { self.enter("download_file", Some(detail)).await })
    }

    fn reset(&mut self) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(self.enter("reset", None))
    }

    fn go(&mut self) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(self.enter("go", None))
    }

    fn close(&mut self) -> BoxFuture<'_, HwResult<()>> {
        Box::pin(self.enter("close", None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_programmer_requires_open_session() {
        let journal = CallJournal::default();
        let mut programmer = SimProgrammer::new("SN1", journal.clone());

        assert!(programmer.connect().await.is_err());
        programmer.open().await.unwrap();
        programmer.connect().await.unwrap();
        programmer.close().await.unwrap();
        assert!(programmer.go().await.is_err());

        assert_eq!(journal.count("connect"), 2);
    }

    #[tokio::test]
    async fn test_fixture_properties_round_trip() {
        let journal = CallJournal::default();
        let mut fixture = SimFixture::new("fx", journal.clone()).with_socket(1, SimSocket::healthy("A1"));

        fixture
            .set_property(SocketIndex(1), "voltageChecked", PropertyValue::Bool(true))
            .await
            .unwrap();
        let value = fixture.get_property(SocketIndex(1), "voltageChecked").await.unwrap();
        assert_eq!(value, Some(PropertyValue::Bool(true)));
        assert_eq!(journal.count_for("fx", "set_property", SocketIndex(1)), 1);
    }

    #[tokio::test]
    async fn test_shared_faults_apply_until_healed() {
        let journal = CallJournal::default();
        let faults = SimFaults::default();
        let mut fixture = SimFixture::new("fx", journal.clone()).with_faults(faults.clone());
        let mut programmer = SimProgrammer::new("SN1", journal.clone()).with_faults(faults.clone());

        fixture.detect_devices().await.unwrap();
        programmer.test_connection().await.unwrap();

        faults.inject("detect_devices");
        faults.inject("test_connection");
        assert!(fixture.detect_devices().await.is_err());
        assert!(programmer.test_connection().await.is_err());

        faults.heal("test_connection");
        programmer.test_connection().await.unwrap();
        assert_eq!(journal.count("test_connection"), 3);
    }

    #[tokio::test]
    async fn test_unscripted_socket_is_empty() {
        let mut fixture = SimFixture::new("fx", CallJournal::default());
        assert!(!fixture.is_device_available(SocketIndex(2)).await.unwrap());
    }
}
