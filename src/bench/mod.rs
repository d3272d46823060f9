//! Bench Module - capability seams for fixture controllers and programmer links
//!
//! The physical side of the bench (socket power and SWD muxing inside a fixture
//! controller, the programmer's flash protocol, analog sampling, sensor buses)
//! is consumed through the two traits below. The orchestrator never talks to
//! hardware any other way.

pub mod pair;
pub mod sim;

use futures::future::BoxFuture;

use crate::error::HardwareError;
use crate::models::{Peripheral, PropertyValue, SocketIndex};

pub use pair::{Bench, BenchPair, PairHandles};
pub use sim::{CallJournal, CallRecord, SimFaults, SimFixture, SimProgrammer, SimSocket};

/// Result of a single capability call.
pub type HwResult<T> = Result<T, HardwareError>;

/// Trait for a fixture controller owning one bank of sockets.
pub trait FixtureController: Send {
    /// Human-readable name used in log lines.
    fn name(&self) -> String;

    /// Refresh presence information for every socket of the bank.
    fn detect_devices(&mut self) -> BoxFuture<'_, HwResult<()>>;

    fn is_device_available(&mut self, socket: SocketIndex) -> BoxFuture<'_, HwResult<bool>>;

    /// Whether the device passed the upstream acceptance gate.
    fn is_device_accepted(&mut self, socket: SocketIndex) -> BoxFuture<'_, HwResult<bool>>;

    fn power_on(&mut self, socket: SocketIndex) -> BoxFuture<'_, HwResult<()>>;

    fn power_off(&mut self, socket: SocketIndex) -> BoxFuture<'_, HwResult<()>>;

    /// Mux the socket's SWD lines onto the paired programmer.
    fn route_debug_lines(&mut self, socket: SocketIndex) -> BoxFuture<'_, HwResult<()>>;

    fn read_analog_input(
        &mut self,
        socket: SocketIndex,
        channel: u32,
        range_hint: u32,
    ) -> BoxFuture<'_, HwResult<i64>>;

    /// Unique chip identifier as reported by the test firmware.
    fn read_chip_id(&mut self, socket: SocketIndex) -> BoxFuture<'_, HwResult<String>>;

    fn check_peripheral(
        &mut self,
        socket: SocketIndex,
        peripheral: Peripheral,
    ) -> BoxFuture<'_, HwResult<bool>>;

    fn get_property(
        &mut self,
        socket: SocketIndex,
        name: &str,
    ) -> BoxFuture<'_, HwResult<Option<PropertyValue>>>;

    fn set_property(
        &mut self,
        socket: SocketIndex,
        name: &str,
        value: PropertyValue,
    ) -> BoxFuture<'_, HwResult<()>>;

    fn record_error(&mut self, socket: SocketIndex, message: &str) -> BoxFuture<'_, HwResult<()>>;

    /// Signal that the device's result is final for this cycle.
    fn report_socket_fully_tested(&mut self, socket: SocketIndex) -> BoxFuture<'_, HwResult<()>>;
}

/// Trait for the debug programmer paired with one fixture controller.
///
/// Drives whichever socket is currently routed onto it.
pub trait ProgrammerLink: Send {
    /// Programmer serial number.
    fn serial(&self) -> String;

    /// Reachability check used by the connectivity stage.
    fn test_connection(&mut self) -> BoxFuture<'_, HwResult<()>>;

    fn select_by_usb(&mut self) -> BoxFuture<'_, HwResult<()>>;
    fn open(&mut self) -> BoxFuture<'_, HwResult<()>>;
    fn set_device(&mut self, part: &str) -> BoxFuture<'_, HwResult<()>>;
    fn select(&mut self) -> BoxFuture<'_, HwResult<()>>;
    fn set_speed(&mut self, khz: u32) -> BoxFuture<'_, HwResult<()>>;
    fn connect(&mut self) -> BoxFuture<'_, HwResult<()>>;
    fn erase(&mut self) -> BoxFuture<'_, HwResult<()>>;
    fn download_file(&mut self, path: &str, offset: u32) -> BoxFuture<'_, HwResult<()>>;
    fn reset(&mut self) -> BoxFuture<'_, HwResult<()>>;
    fn go(&mut self) -> BoxFuture<'_, HwResult<()>>;
    fn close(&mut self) -> BoxFuture<'_, HwResult<()>>;
}
