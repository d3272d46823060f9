//! End-to-end sequencing tests on the simulated bench.
//!
//! Covers:
//! - Stage barriers and concurrency across boards
//! - The availability predicate as a no-op for empty or rejected sockets
//! - Exactly-once completion reporting
//! - Voltage band edges
//! - Session open failures, call timeouts and unreachable programmers
//! - Sequential mode and board reordering
//! - Cancellation in the middle of a stage
//! - Fresh records on every cycle

use std::sync::Arc;

use slotbench::bench::{CallJournal, CallRecord, SimFaults, SimFixture, SimProgrammer, SimSocket};
use slotbench::config::BenchSettings;
use slotbench::error::SequenceError;
use slotbench::models::{DeviceKey, DeviceState, Peripheral, PropertyValue, SocketIndex};
use slotbench::orchestrator::RunPhase;
use slotbench::{Bench, BenchPair, SequenceEvent, SequenceRunner, Stage};
use tokio::sync::{mpsc, watch};

fn runner(bench: Bench, settings: BenchSettings) -> (SequenceRunner, watch::Sender<bool>) {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    (SequenceRunner::new(Arc::new(bench), settings, cancel_rx), cancel_tx)
}

fn healthy_fixture(name: &str, journal: &CallJournal) -> SimFixture {
    SimFixture::new(name, journal.clone())
        .with_socket(1, SimSocket::healthy(&format!("{}-1", name)))
        .with_socket(2, SimSocket::healthy(&format!("{}-2", name)))
        .with_socket(3, SimSocket::healthy(&format!("{}-3", name)))
}

fn pair(fixture: SimFixture, serial: &str, journal: &CallJournal) -> BenchPair {
    BenchPair::new(Box::new(fixture), Box::new(SimProgrammer::new(serial, journal.clone())))
}

fn state_of(runner: &SequenceRunner, pair: usize, socket: u32) -> Option<DeviceState> {
    runner
        .table()
        .get(DeviceKey::new(pair, SocketIndex(socket)))
        .map(|r| r.state())
}

type Marker = Box<dyn Fn(&CallRecord) -> bool>;

fn call_marker(call: &'static str) -> Marker {
    Box::new(move |r: &CallRecord| r.call == call)
}

fn download_marker(image: &'static str) -> Marker {
    Box::new(move |r: &CallRecord| {
        r.call == "download_file" && r.detail.as_deref().map_or(false, |d| d.contains(image))
    })
}

/// Marker call of every pipeline stage, in order.
fn stage_markers() -> Vec<Marker> {
    vec![
        call_marker("test_connection"),
        call_marker("detect_devices"),
        download_marker("railtest.hex"),
        call_marker("read_chip_id"),
        call_marker("read_analog_input"),
        call_marker("check_peripheral"),
        call_marker("report_socket_fully_tested"),
        download_marker("production.hex"),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_stages_are_barriers_across_boards() {
    let journal = CallJournal::default();
    let bench = Bench::new(vec![
        pair(healthy_fixture("fx0", &journal), "SN0", &journal),
        pair(healthy_fixture("fx1", &journal), "SN1", &journal),
    ]);
    let (runner, _cancel) = runner(bench, BenchSettings::default());

    let summary = runner.run_full_cycle().await.unwrap();
    assert_eq!(summary.passed, 6);
    assert_eq!(summary.failed, 0);

    let records = journal.records();
    let markers = stage_markers();
    for window in markers.windows(2) {
        let last_of_current = records.iter().rposition(|r| window[0](r)).unwrap();
        let first_of_next = records.iter().position(|r| window[1](r)).unwrap();
        assert!(
            last_of_current < first_of_next,
            "stage boundary crossed at record {} / {}",
            last_of_current,
            first_of_next
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_parallel_mode_interleaves_boards_within_a_stage() {
    let journal = CallJournal::default();
    let bench = Bench::new(vec![
        pair(healthy_fixture("fx0", &journal), "SN0", &journal),
        pair(healthy_fixture("fx1", &journal), "SN1", &journal),
    ]);
    let (runner, _cancel) = runner(bench, BenchSettings::default());
    runner.run_full_cycle().await.unwrap();

    let reads: Vec<String> = journal
        .records()
        .into_iter()
        .filter(|r| r.call == "read_chip_id")
        .map(|r| r.device)
        .collect();
    let last_fx0 = reads.iter().rposition(|d| d == "fx0").unwrap();
    let first_fx1 = reads.iter().position(|d| d == "fx1").unwrap();
    assert!(first_fx1 < last_fx0, "boards ran one after the other: {:?}", reads);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_mode_visits_boards_in_order() {
    let journal = CallJournal::default();
    let bench = Bench::new(vec![
        pair(healthy_fixture("fx0", &journal), "SN0", &journal),
        pair(healthy_fixture("fx1", &journal), "SN1", &journal),
    ]);
    let settings = BenchSettings {
        parallel: false,
        ..BenchSettings::default()
    };
    let (runner, _cancel) = runner(bench, settings);

    let summary = runner.run_full_cycle().await.unwrap();
    assert_eq!(summary.passed, 6);

    let reads: Vec<String> = journal
        .records()
        .into_iter()
        .filter(|r| r.call == "read_chip_id")
        .map(|r| r.device)
        .collect();
    assert_eq!(reads, vec!["fx0", "fx0", "fx0", "fx1", "fx1", "fx1"]);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_sockets_see_only_the_predicate() {
    let journal = CallJournal::default();
    let fixture = SimFixture::new("fx0", journal.clone())
        .with_socket(1, SimSocket::healthy("A"))
        .with_socket(2, SimSocket::empty())
        .with_socket(3, SimSocket::not_accepted("C"));
    let (runner, _cancel) = runner(Bench::new(vec![pair(fixture, "SN0", &journal)]), BenchSettings::default());

    runner.run_full_cycle().await.unwrap();

    let empty = journal.calls_for_socket("fx0", SocketIndex(2));
    assert!(!empty.is_empty());
    assert!(empty.iter().all(|c| c == "is_device_available"), "{:?}", empty);

    let rejected = journal.calls_for_socket("fx0", SocketIndex(3));
    assert!(rejected
        .iter()
        .all(|c| c == "is_device_available" || c == "is_device_accepted"));

    assert_eq!(state_of(&runner, 0, 2), None);
    assert_eq!(state_of(&runner, 0, 3), None);
    assert_eq!(state_of(&runner, 0, 1), Some(DeviceState::Passed));
}

#[tokio::test(start_paused = true)]
async fn test_fully_tested_reported_once_per_eligible_socket() {
    let journal = CallJournal::default();
    let fixture = SimFixture::new("fx0", journal.clone())
        .with_socket(1, SimSocket::healthy("A"))
        .with_socket(2, SimSocket::healthy("B").with_peripheral(Peripheral::Dali, false))
        .with_socket(3, SimSocket::empty());
    let (runner, _cancel) = runner(Bench::new(vec![pair(fixture, "SN0", &journal)]), BenchSettings::default());

    runner.run_full_cycle().await.unwrap();

    assert_eq!(journal.count_for("fx0", "report_socket_fully_tested", SocketIndex(1)), 1);
    assert_eq!(journal.count_for("fx0", "report_socket_fully_tested", SocketIndex(2)), 1);
    assert_eq!(journal.count_for("fx0", "report_socket_fully_tested", SocketIndex(3)), 0);
    assert_eq!(state_of(&runner, 0, 2), Some(DeviceState::Failed));

    // Verdict codes are mirrored onto the fixture before the report
    let states: Vec<_> = journal
        .records()
        .into_iter()
        .filter(|r| r.call == "set_property" && r.detail.as_deref().map_or(false, |d| d.starts_with("state=")))
        .map(|r| (r.socket, r.detail))
        .collect();
    assert_eq!(
        states,
        vec![
            (Some(SocketIndex(1)), Some(format!("state={:?}", PropertyValue::Int(2)))),
            (Some(SocketIndex(2)), Some(format!("state={:?}", PropertyValue::Int(3)))),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_voltage_band_edges_are_rejected() {
    let journal = CallJournal::default();
    let fixture = SimFixture::new("fx0", journal.clone())
        .with_socket(1, SimSocket::healthy("A").with_voltage(70_000))
        .with_socket(2, SimSocket::healthy("B").with_voltage(71_000))
        .with_socket(3, SimSocket::healthy("C").with_voltage(72_000));
    let (runner, _cancel) = runner(Bench::new(vec![pair(fixture, "SN0", &journal)]), BenchSettings::default());

    let summary = runner.run_full_cycle().await.unwrap();
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(state_of(&runner, 0, 1), Some(DeviceState::Failed));
    assert_eq!(state_of(&runner, 0, 2), Some(DeviceState::Passed));
    assert_eq!(state_of(&runner, 0, 3), Some(DeviceState::Failed));

    let edge = runner.table().get(DeviceKey::new(0, SocketIndex(3))).unwrap();
    assert_eq!(edge.facts.voltage_checked, Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_failed_session_open_skips_qualification() {
    let journal = CallJournal::default();
    let programmer = SimProgrammer::new("SN0", journal.clone()).with_fault("open");
    let bench = Bench::new(vec![BenchPair::new(
        Box::new(healthy_fixture("fx0", &journal)),
        Box::new(programmer),
    )]);
    let (runner, _cancel) = runner(bench, BenchSettings::default());

    let summary = runner.run_full_cycle().await.unwrap();
    assert_eq!(summary.failed, 3);
    assert_eq!(journal.count("read_chip_id"), 0);
    assert_eq!(journal.count("check_peripheral"), 0);
    assert_eq!(journal.count("read_analog_input"), 0);

    let record = runner.table().get(DeviceKey::new(0, SocketIndex(1))).unwrap();
    assert_eq!(record.firmware_loaded, Some(false));
    assert!(!record.errors.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_call_times_out_as_failure() {
    let journal = CallJournal::default();
    let fixture = SimFixture::new("fx0", journal.clone())
        .with_socket(1, SimSocket::healthy("A").with_hang("read_chip_id"))
        .with_socket(2, SimSocket::healthy("B"));
    let (runner, _cancel) = runner(Bench::new(vec![pair(fixture, "SN0", &journal)]), BenchSettings::default());

    let summary = runner.run_full_cycle().await.unwrap();
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 1);

    let hung = runner.table().get(DeviceKey::new(0, SocketIndex(1))).unwrap();
    assert_eq!(hung.state(), DeviceState::Failed);
    assert!(!hung.facts.has_id());
    // The later stages still ran for the device
    assert_eq!(journal.count_for("fx0", "read_analog_input", SocketIndex(1)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_programmer_skips_only_its_board() {
    let journal = CallJournal::default();
    let bench = Bench::new(vec![
        pair(healthy_fixture("fx0", &journal), "SN0", &journal),
        BenchPair::new(
            Box::new(healthy_fixture("fx1", &journal)),
            Box::new(SimProgrammer::new("SN1", journal.clone()).unreachable()),
        ),
    ]);
    let (runner, _cancel) = runner(bench, BenchSettings::default());

    let summary = runner.run_full_cycle().await.unwrap();
    assert_eq!(summary.passed, 3);
    assert_eq!(summary.failed, 0);

    assert!(journal.calls_for_device("fx1").is_empty());
    assert_eq!(journal.calls_for_device("SN1"), vec!["test_connection"]);
    assert_eq!(state_of(&runner, 1, 1), None);
}

#[tokio::test(start_paused = true)]
async fn test_swapped_boards_keep_their_programmers() {
    let journal = CallJournal::default();
    let mut bench = Bench::new(vec![
        pair(healthy_fixture("fx0", &journal), "SN0", &journal),
        BenchPair::new(
            Box::new(healthy_fixture("fx1", &journal)),
            Box::new(SimProgrammer::new("SN1", journal.clone()).with_fault("connect")),
        ),
    ]);
    bench.swap(0, 1);
    let (runner, _cancel) = runner(bench, BenchSettings::default());

    runner.run_full_cycle().await.unwrap();

    // fx1 now sits at position 0 and is still programmed through the faulty SN1
    for socket in 1..=3 {
        assert_eq!(state_of(&runner, 0, socket), Some(DeviceState::Failed));
        assert_eq!(state_of(&runner, 1, socket), Some(DeviceState::Passed));
    }
    assert_eq!(journal.count_for("fx1", "read_chip_id", SocketIndex(1)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_device_numbers_from_fixture_then_board() {
    let journal = CallJournal::default();
    let fixture = healthy_fixture("fx0", &journal).with_property(1, "no", PropertyValue::Int(41));
    let bench = Bench::new(vec![pair(fixture, "SN0", &journal).with_dut_numbers(vec![7, 8, 9])]);
    let (runner, _cancel) = runner(bench, BenchSettings::default());

    runner.run_full_cycle().await.unwrap();

    let first = runner.table().get(DeviceKey::new(0, SocketIndex(1))).unwrap();
    let second = runner.table().get(DeviceKey::new(0, SocketIndex(2))).unwrap();
    assert_eq!(first.dut_number, Some(41));
    assert_eq!(second.dut_number, Some(8));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_stage_finishes_the_running_stage() {
    let journal = CallJournal::default();
    let bench = Bench::new(vec![
        pair(healthy_fixture("fx0", &journal), "SN0", &journal),
        pair(healthy_fixture("fx1", &journal), "SN1", &journal),
    ]);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (tx, mut rx) = mpsc::channel(256);
    let runner = SequenceRunner::new(Arc::new(bench), BenchSettings::default(), cancel_rx).with_events(tx);

    // Operator aborts as soon as the test firmware download begins
    let abort = async {
        while let Some(event) = rx.recv().await {
            if event == SequenceEvent::StageStarted(Stage::PretestDownload) {
                cancel_tx.send(true).unwrap();
                break;
            }
        }
    };
    let (result, ()) = tokio::join!(runner.run_full_cycle(), abort);

    assert_eq!(
        result,
        Err(SequenceError::Cancelled(Stage::Identification.as_str().to_string()))
    );
    assert_eq!(runner.state_snapshot().await.phase, RunPhase::Cancelled);

    // The download still reached every socket of both boards
    let test_image = download_marker("railtest.hex");
    assert_eq!(journal.records().iter().filter(|r| test_image(r)).count(), 6);
    assert_eq!(journal.count("open"), 6);
    assert_eq!(journal.count("open"), journal.count("close"));
    assert_eq!(journal.count("read_chip_id"), 0);

    drop(runner);
    let mut rest = Vec::new();
    while let Some(event) = rx.recv().await {
        rest.push(event);
    }
    assert!(rest
        .iter()
        .any(|e| matches!(e, SequenceEvent::StageFinished(Stage::PretestDownload, t) if t.eligible == 6)));
    assert!(rest.contains(&SequenceEvent::Cancelled(Stage::Identification)));
    assert!(!rest.contains(&SequenceEvent::StageStarted(Stage::Identification)));
}

#[tokio::test(start_paused = true)]
async fn test_failed_open_in_second_cycle_fails_previously_passed_devices() {
    let journal = CallJournal::default();
    let faults = SimFaults::default();
    let bench = Bench::new(vec![BenchPair::new(
        Box::new(healthy_fixture("fx0", &journal).with_faults(faults.clone())),
        Box::new(SimProgrammer::new("SN0", journal.clone()).with_faults(faults.clone())),
    )]);
    let (runner, _cancel) = runner(bench, BenchSettings::default());

    let first = runner.run_full_cycle().await.unwrap();
    assert_eq!(first.passed, 3);

    faults.inject("detect_devices");
    faults.inject("open");
    let second = runner.run_full_cycle().await.unwrap();
    assert_eq!(second.passed, 0);
    assert_eq!(second.failed, 3);

    for socket in 1..=3 {
        let record = runner.table().get(DeviceKey::new(0, SocketIndex(socket))).unwrap();
        assert_eq!(record.state(), DeviceState::Failed);
        assert_eq!(record.firmware_loaded, Some(false));
        assert!(!record.facts.has_id(), "stale id kept: {:?}", record.facts);
    }
    // Identification ran in the first cycle only
    assert_eq!(journal.count("read_chip_id"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_board_unreachable_in_second_cycle_reports_nothing() {
    let journal = CallJournal::default();
    let faults = SimFaults::default();
    let bench = Bench::new(vec![BenchPair::new(
        Box::new(healthy_fixture("fx0", &journal)),
        Box::new(SimProgrammer::new("SN0", journal.clone()).with_faults(faults.clone())),
    )]);
    let (runner, _cancel) = runner(bench, BenchSettings::default());

    assert_eq!(runner.run_full_cycle().await.unwrap().passed, 3);

    faults.inject("test_connection");
    let second = runner.run_full_cycle().await.unwrap();
    assert_eq!(second.passed, 0);
    assert_eq!(second.failed, 0);
    assert_eq!(second.unfinished, 0);
    assert!(runner.table().is_empty());

    // Healed board is picked up again on the next cycle
    faults.heal("test_connection");
    assert_eq!(runner.run_full_cycle().await.unwrap().passed, 3);
}

#[tokio::test(start_paused = true)]
async fn test_blank_chip_id_fails_the_device() {
    let journal = CallJournal::default();
    let fixture = SimFixture::new("fx0", journal.clone())
        .with_socket(1, SimSocket::healthy("   "))
        .with_socket(2, SimSocket::healthy("B"));
    let (runner, _cancel) = runner(Bench::new(vec![pair(fixture, "SN0", &journal)]), BenchSettings::default());

    let summary = runner.run_full_cycle().await.unwrap();
    assert_eq!(summary.passed, 1);

    let blank = runner.table().get(DeviceKey::new(0, SocketIndex(1))).unwrap();
    assert_eq!(blank.state(), DeviceState::Failed);
    assert!(
        blank
            .errors
            .iter()
            .any(|e| e.contains("read_chip_id returned an empty response")),
        "{:?}",
        blank.errors
    );
}
