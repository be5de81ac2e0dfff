// SPDX-License-Identifier: Apache-2.0

use super::*;
use hale_core::IdentifierHash;

fn snap(state: ProcessState) -> ProcessSnapshot {
    ProcessSnapshot {
        process: 0,
        state,
        pg_state: IdentifierHash::of("/PG/Run"),
        timestamp: 10,
        execution_error: 0,
    }
}

fn monitor() -> (MonitorInterface<FakeCheckpointSource>, FakeCheckpointSource) {
    let source = FakeCheckpointSource::new();
    let writer = source.writer();
    (MonitorInterface::new("mon".into(), 0, source), writer)
}

#[test]
fn inactive_monitor_leaves_ring_alone() {
    let (mut mon, writer) = monitor();
    writer.push(5, 1);

    let mut out = Vec::new();
    mon.check_for_new_data(100, &mut out);
    assert!(out.is_empty());
    assert_eq!(mon.state(), MonitorState::Inactive);
}

#[test]
fn activation_then_drain_up_to_sync() {
    let (mut mon, writer) = monitor();
    mon.on_process_state(&snap(ProcessState::Starting));
    writer.push(5, 1);
    writer.push(50, 2);
    writer.push(150, 3);

    let mut out = Vec::new();
    mon.check_for_new_data(100, &mut out);
    assert_eq!(
        out,
        vec![
            MonitorEvent::Checkpoint { id: 1, timestamp: 5 },
            MonitorEvent::Checkpoint { id: 2, timestamp: 50 },
        ]
    );
    assert_eq!(mon.state(), MonitorState::Active);

    // The record beyond the sync timestamp is picked up next cycle.
    out.clear();
    mon.check_for_new_data(200, &mut out);
    assert_eq!(out, vec![MonitorEvent::Checkpoint { id: 3, timestamp: 150 }]);
}

#[test]
fn overflow_reports_data_loss_and_parks() {
    let (mut mon, writer) = monitor();
    mon.on_process_state(&snap(ProcessState::Running));
    writer.set_overflow();

    let mut out = Vec::new();
    mon.check_for_new_data(100, &mut out);
    assert_eq!(out, vec![MonitorEvent::DataLoss]);
    assert_eq!(mon.state(), MonitorState::InactiveOverflow);

    // Nothing further while parked.
    out.clear();
    mon.check_for_new_data(200, &mut out);
    assert!(out.is_empty());
}

#[test]
fn failing_pop_counts_as_data_loss() {
    let (mut mon, writer) = monitor();
    mon.on_process_state(&snap(ProcessState::Running));
    writer.push(5, 1);
    writer.set_fail_pop();

    let mut out = Vec::new();
    mon.check_for_new_data(100, &mut out);
    assert_eq!(out.last(), Some(&MonitorEvent::DataLoss));
    assert_eq!(mon.state(), MonitorState::InactiveOverflow);
}

#[test]
fn restart_while_parked_reannounces_loss() {
    let (mut mon, writer) = monitor();
    mon.on_process_state(&snap(ProcessState::Running));
    writer.set_overflow();

    let mut out = Vec::new();
    mon.check_for_new_data(100, &mut out);
    assert_eq!(mon.state(), MonitorState::InactiveOverflow);

    // Process dies and comes back.
    mon.on_process_state(&snap(ProcessState::Terminated));
    mon.on_process_state(&snap(ProcessState::Starting));

    out.clear();
    mon.check_for_new_data(200, &mut out);
    assert_eq!(out, vec![MonitorEvent::DataLoss]);

    // Announced once per restart.
    out.clear();
    mon.check_for_new_data(300, &mut out);
    assert!(out.is_empty());
}

#[test]
fn deactivation_applies_at_tick_boundary() {
    let (mut mon, writer) = monitor();
    mon.on_process_state(&snap(ProcessState::Running));
    let mut out = Vec::new();
    mon.check_for_new_data(100, &mut out);
    assert_eq!(mon.state(), MonitorState::Active);

    // Checkpoints reported before the exit still drain on this tick.
    writer.push(150, 4);
    mon.on_process_state(&snap(ProcessState::Terminated));

    out.clear();
    mon.check_for_new_data(200, &mut out);
    assert_eq!(out, vec![MonitorEvent::Checkpoint { id: 4, timestamp: 150 }]);
    assert_eq!(mon.state(), MonitorState::Inactive);
}
