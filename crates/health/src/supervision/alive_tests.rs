// SPDX-License-Identifier: Apache-2.0

use super::*;
use hale_core::IdentifierHash;

const MS: u64 = 1_000_000;
const RUN: &str = "/PG/Run";

fn config(min: u32, max: u32, tolerance: u32) -> AliveConfig {
    AliveConfig {
        name: "alive".into(),
        checkpoint: 0,
        reference_cycle_ns: 50 * MS,
        min_indications: min,
        max_indications: max,
        min_disabled: false,
        max_disabled: false,
        failed_cycles_tolerance: tolerance,
        buffer_size: 32,
        pg_states: vec![IdentifierHash::of(RUN)],
        processes: vec![0],
    }
}

fn supervision(min: u32, max: u32, tolerance: u32) -> AliveSupervision {
    AliveSupervision::new(0, &config(min, max, tolerance))
}

fn activate(sup: &mut AliveSupervision, ts: Nanos) {
    sup.on_process_state(ProcessSnapshot {
        process: 0,
        state: ProcessState::Running,
        pg_state: IdentifierHash::of(RUN),
        timestamp: ts,
        execution_error: 7,
    });
}

fn deactivate(sup: &mut AliveSupervision, ts: Nanos) {
    sup.on_process_state(ProcessSnapshot {
        process: 0,
        state: ProcessState::Terminating,
        pg_state: IdentifierHash::of(RUN),
        timestamp: ts,
        execution_error: 7,
    });
}

fn checkpoint(sup: &mut AliveSupervision, ts: Nanos) {
    sup.on_checkpoint(CheckpointSnapshot { checkpoint: 0, id: 1, timestamp: ts });
}

fn eval(sup: &mut AliveSupervision, ts: Nanos) -> Vec<StatusUpdate> {
    let mut out = Vec::new();
    sup.evaluate(ts, &mut out);
    out
}

#[test]
fn starts_deactivated() {
    let sup = supervision(1, 1, 0);
    assert_eq!(sup.status(), ElementaryStatus::Deactivated);
}

#[test]
fn activation_switches_to_ok() {
    let mut sup = supervision(1, 1, 0);
    activate(&mut sup, 10 * MS);
    let updates = eval(&mut sup, 20 * MS);

    assert_eq!(sup.status(), ElementaryStatus::Ok);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status, ElementaryStatus::Ok);
    assert_eq!(updates[0].timestamp, 10 * MS);
}

#[test]
fn indications_in_bounds_stay_ok() {
    let mut sup = supervision(1, 2, 0);
    activate(&mut sup, 0);
    eval(&mut sup, 10 * MS);

    // Window [0, 50ms): one checkpoint, evaluated when sync passes the end.
    checkpoint(&mut sup, 20 * MS);
    eval(&mut sup, 40 * MS);
    assert_eq!(sup.status(), ElementaryStatus::Ok);

    checkpoint(&mut sup, 60 * MS);
    eval(&mut sup, 70 * MS);
    assert_eq!(sup.status(), ElementaryStatus::Ok);
}

#[test]
fn missing_indications_expire_with_zero_tolerance() {
    let mut sup = supervision(1, 1, 0);
    activate(&mut sup, 0);
    eval(&mut sup, 10 * MS);

    // No checkpoints in [0, 50ms): the sync at 60ms triggers evaluation.
    eval(&mut sup, 60 * MS);
    assert_eq!(sup.status(), ElementaryStatus::Expired);
}

#[test]
fn too_many_indications_expire() {
    let mut sup = supervision(0, 1, 0);
    activate(&mut sup, 0);
    eval(&mut sup, 10 * MS);

    checkpoint(&mut sup, 20 * MS);
    checkpoint(&mut sup, 30 * MS);
    eval(&mut sup, 60 * MS);
    assert_eq!(sup.status(), ElementaryStatus::Expired);
}

#[test]
fn tolerance_goes_through_failed() {
    // S4: tolerance 2, producer reports nothing for three cycles.
    let mut sup = supervision(1, 1, 2);
    activate(&mut sup, 0);
    eval(&mut sup, 10 * MS);

    let updates = eval(&mut sup, 60 * MS); // cycle 1 evaluated
    assert_eq!(sup.status(), ElementaryStatus::Failed);
    assert_eq!(updates.last().map(|u| u.status), Some(ElementaryStatus::Failed));

    eval(&mut sup, 110 * MS); // cycle 2: still failed
    assert_eq!(sup.status(), ElementaryStatus::Failed);

    let updates = eval(&mut sup, 160 * MS); // cycle 3: tolerance exhausted
    assert_eq!(sup.status(), ElementaryStatus::Expired);
    assert_eq!(updates.last().map(|u| u.status), Some(ElementaryStatus::Expired));
    // The producer's execution error rides along.
    assert_eq!(updates.last().map(|u| u.execution_error), Some(7));
}

#[test]
fn failed_recovers_to_ok_when_indications_return() {
    let mut sup = supervision(1, 1, 3);
    activate(&mut sup, 0);
    eval(&mut sup, 10 * MS);

    eval(&mut sup, 60 * MS);
    assert_eq!(sup.status(), ElementaryStatus::Failed);

    checkpoint(&mut sup, 70 * MS);
    eval(&mut sup, 110 * MS);
    assert_eq!(sup.status(), ElementaryStatus::Ok);
}

#[test]
fn expired_stays_until_deactivation() {
    let mut sup = supervision(1, 1, 0);
    activate(&mut sup, 0);
    eval(&mut sup, 10 * MS);
    eval(&mut sup, 60 * MS);
    assert_eq!(sup.status(), ElementaryStatus::Expired);

    // Checkpoints do not heal an expired supervision.
    checkpoint(&mut sup, 70 * MS);
    eval(&mut sup, 110 * MS);
    assert_eq!(sup.status(), ElementaryStatus::Expired);

    deactivate(&mut sup, 120 * MS);
    eval(&mut sup, 130 * MS);
    assert_eq!(sup.status(), ElementaryStatus::Deactivated);
}

#[test]
fn data_loss_expires_and_heals_via_deactivation() {
    let mut sup = supervision(1, 1, 0);
    activate(&mut sup, 0);
    eval(&mut sup, 10 * MS);

    sup.on_data_loss(20 * MS);
    let updates = eval(&mut sup, 30 * MS);
    assert_eq!(sup.status(), ElementaryStatus::Expired);
    assert_eq!(updates.last().map(|u| u.status), Some(ElementaryStatus::Expired));

    // After loss all processes count as active, so a clean termination
    // deactivates the supervision the normal way.
    deactivate(&mut sup, 40 * MS);
    eval(&mut sup, 50 * MS);
    assert_eq!(sup.status(), ElementaryStatus::Deactivated);
}

#[test]
fn data_loss_timestamp_zero_uses_last_sync() {
    let mut sup = supervision(1, 1, 0);
    activate(&mut sup, 0);
    eval(&mut sup, 10 * MS);

    sup.on_data_loss(0);
    assert_eq!(sup.timestamp(), 10 * MS);
}

#[test]
fn crash_recovery_restarts_the_window() {
    let mut sup = supervision(1, 1, 1);
    activate(&mut sup, 0);
    eval(&mut sup, 10 * MS);

    // Crash: straight to Terminated, then restart.
    sup.on_process_state(ProcessSnapshot {
        process: 0,
        state: ProcessState::Terminated,
        pg_state: IdentifierHash::of(RUN),
        timestamp: 20 * MS,
        execution_error: 7,
    });
    activate(&mut sup, 30 * MS);
    let updates = eval(&mut sup, 40 * MS);

    // Deactivated then immediately Ok again in one evaluate call.
    let statuses: Vec<_> = updates.iter().map(|u| u.status).collect();
    assert!(statuses.contains(&ElementaryStatus::Deactivated));
    assert_eq!(statuses.last(), Some(&ElementaryStatus::Ok));
    assert_eq!(sup.status(), ElementaryStatus::Ok);
}

#[test]
fn multiple_reference_cycles_per_tick() {
    let mut sup = supervision(1, 1, 0);
    activate(&mut sup, 0);
    eval(&mut sup, 10 * MS);

    // Three cycles pass within one daemon tick, each with a checkpoint.
    checkpoint(&mut sup, 20 * MS);
    checkpoint(&mut sup, 70 * MS);
    checkpoint(&mut sup, 120 * MS);
    eval(&mut sup, 160 * MS);
    assert_eq!(sup.status(), ElementaryStatus::Ok);
}

#[test]
fn buffer_overflow_is_data_loss() {
    let mut sup = AliveSupervision::new(
        0,
        &AliveConfig { buffer_size: 2, ..config(1, 1, 0) },
    );
    activate(&mut sup, 0);
    checkpoint(&mut sup, 1);
    checkpoint(&mut sup, 2); // buffer full now
    eval(&mut sup, 10 * MS);
    assert_eq!(sup.status(), ElementaryStatus::Expired);
}
