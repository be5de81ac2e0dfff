// SPDX-License-Identifier: Apache-2.0

//! Supervision pipeline scenarios driven from a loaded configuration.

use std::cell::RefCell;

use hale_core::{FakeClock, GlobalStatus, IdentifierHash, MachineConfig, Nanos, ProcessState};
use hale_health::{
    ClusterHandler, FakeCheckpointSource, NotifierState, ProcessSnapshot, RecoveryHandler,
    RecoveryTicket, TickReport,
};

const MS: u64 = 1_000_000;

const GROUPS_TOML: &str = r#"
[hm]

[[hm.process]]
process = "/Machine/core"
states = ["/Machine/Run"]
execution_errors = [11]

[[hm.monitor]]
name = "core-mon"
process = "/Machine/core"
writer_uid = 1000

[[hm.checkpoint]]
name = "heartbeat"
id = 1
monitor = "core-mon"
process = "/Machine/core"

[[hm.checkpoint]]
name = "frame-start"
id = 2
monitor = "core-mon"
process = "/Machine/core"

[[hm.checkpoint]]
name = "frame-end"
id = 3
monitor = "core-mon"
process = "/Machine/core"

[[hm.alive]]
name = "core-alive"
checkpoint = "heartbeat"
reference_cycle_ms = 50
min_indications = 1
max_indications = 1
failed_cycles_tolerance = 2
states = ["/Machine/Run"]
processes = ["/Machine/core"]

[[hm.deadline]]
name = "frame-deadline"
source = "frame-start"
target = "frame-end"
min_deadline_ms = 10
max_deadline_ms = 100
states = ["/Machine/Run"]
processes = ["/Machine/core"]

[[hm.local]]
name = "core-local"
alives = ["core-alive"]

[[hm.local]]
name = "frame-local"
deadlines = ["frame-deadline"]

[[hm.global]]
name = "machine-global"
locals = ["core-local", "frame-local"]
recoveries = ["machine-recovery"]

[[hm.global.tolerance]]
state = "/Machine/Run"
expired_tolerance_ms = 30

[[hm.recovery]]
name = "machine-recovery"
target = "/Machine/Recovery"
timeout_ms = 500
"#;

struct Recorder {
    requests: Vec<(IdentifierHash, IdentifierHash)>,
    tickets: Vec<RecoveryTicket>,
}

impl RecoveryHandler for Recorder {
    fn send_request(
        &mut self,
        group: IdentifierHash,
        state: IdentifierHash,
    ) -> Option<RecoveryTicket> {
        self.requests.push((group, state));
        let ticket = RecoveryTicket::new();
        self.tickets.push(ticket.clone());
        Some(ticket)
    }
}

struct Rig {
    cluster: ClusterHandler<FakeCheckpointSource>,
    writer: FakeCheckpointSource,
    clock: FakeClock,
    recovery: Recorder,
}

impl Rig {
    fn build() -> Self {
        let (_, hm) =
            hale_config::load_groups_str(GROUPS_TOML, &MachineConfig::default()).unwrap();
        let writer = RefCell::new(None);
        let cluster = ClusterHandler::build(&hm, |_| {
            let source = FakeCheckpointSource::new();
            *writer.borrow_mut() = Some(source.writer());
            Ok(source)
        })
        .unwrap();
        Self {
            cluster,
            writer: writer.into_inner().unwrap(),
            clock: FakeClock::new(1),
            recovery: Recorder { requests: Vec::new(), tickets: Vec::new() },
        }
    }

    fn activate_core(&mut self, ts: Nanos) {
        self.cluster.handle_process_event(ProcessSnapshot {
            process: 0,
            state: ProcessState::Running,
            pg_state: IdentifierHash::of("/Machine/Run"),
            timestamp: ts,
            execution_error: 11,
        });
    }

    fn tick(&mut self, sync_ts: Nanos) -> TickReport {
        self.cluster.tick(sync_ts, &self.clock, &mut self.recovery)
    }
}

#[test]
fn alive_tolerance_walks_failed_to_expired() {
    // S4: reference 50ms, min=max=1, tolerance 2; the producer goes mute.
    let mut rig = Rig::build();
    rig.activate_core(5 * MS);
    rig.tick(10 * MS);
    assert_eq!(rig.cluster.global_status(0), Some(GlobalStatus::Ok));

    // Cycle 1 without indications: failed, not yet expired.
    rig.tick(60 * MS);
    assert_eq!(rig.cluster.global_status(0), Some(GlobalStatus::Failed));

    // Cycle 2: still failed.
    rig.tick(110 * MS);
    assert_eq!(rig.cluster.global_status(0), Some(GlobalStatus::Failed));

    // Cycle 3: tolerance exhausted; expired propagates and, after the
    // 30ms debounce, stops.
    rig.tick(160 * MS);
    let report = rig.tick(200 * MS);
    assert!(report.any_stopped);
    assert_eq!(rig.cluster.global_status(0), Some(GlobalStatus::Stopped));
    assert_eq!(
        rig.recovery.requests,
        vec![(IdentifierHash::of("/Machine"), IdentifierHash::of("/Machine/Recovery"))]
    );
}

#[test]
fn resumed_heartbeats_do_not_heal_an_expired_supervision() {
    let mut rig = Rig::build();
    rig.activate_core(5 * MS);
    rig.tick(10 * MS);
    for tick in [60, 110, 160, 200] {
        rig.tick(tick * MS);
    }
    assert_eq!(rig.cluster.global_status(0), Some(GlobalStatus::Stopped));

    // The producer resumes; expired only heals through deactivation.
    rig.writer.push(210 * MS, 1);
    rig.tick(260 * MS);
    assert_eq!(rig.cluster.global_status(0), Some(GlobalStatus::Stopped));

    // A clean termination deactivates the chain.
    rig.cluster.handle_process_event(ProcessSnapshot {
        process: 0,
        state: ProcessState::Terminating,
        pg_state: IdentifierHash::of("/Machine/Run"),
        timestamp: 270 * MS,
        execution_error: 11,
    });
    rig.tick(280 * MS);
    assert_eq!(rig.cluster.global_status(0), Some(GlobalStatus::Deactivated));
}

#[test]
fn deadline_min_violation_escalates_with_the_producer_error() {
    // S5: min 10ms, target arrives after 5ms.
    let mut rig = Rig::build();
    rig.activate_core(5 * MS);
    rig.tick(10 * MS);

    rig.writer.push(20 * MS, 1); // heartbeat keeps alive happy
    rig.writer.push(30 * MS, 2); // frame-start
    rig.writer.push(35 * MS, 3); // frame-end after 5ms < min
    rig.tick(60 * MS);

    // Deadline expired -> frame-local expired -> global expired; debounce
    // still pending at this tick (30ms from 35ms).
    assert_eq!(rig.cluster.global_status(0), Some(GlobalStatus::Expired));

    let report = rig.tick(70 * MS);
    assert!(report.any_stopped);
    assert_eq!(rig.recovery.requests.len(), 1);
}

#[test]
fn healthy_traffic_keeps_the_group_ok() {
    let mut rig = Rig::build();
    rig.activate_core(5 * MS);
    rig.tick(10 * MS);

    // One heartbeat per 50ms cycle; frame pairs inside [10ms, 100ms].
    rig.writer.push(30 * MS, 1);
    rig.writer.push(32 * MS, 2);
    rig.writer.push(52 * MS, 3);
    rig.tick(60 * MS);
    rig.writer.push(80 * MS, 1);
    let report = rig.tick(110 * MS);

    assert!(!report.any_stopped);
    assert!(!report.recovery_timeout);
    assert_eq!(rig.cluster.global_status(0), Some(GlobalStatus::Ok));
}

#[test]
fn events_beyond_the_sync_timestamp_wait_for_the_next_cycle() {
    // Invariant 1: a checkpoint stamped after the sync timestamp must not
    // be consumed in this tick.
    let mut rig = Rig::build();
    rig.activate_core(5 * MS);
    rig.tick(10 * MS);

    // Two heartbeats in the first cycle, but one belongs to the future.
    rig.writer.push(20 * MS, 1);
    rig.writer.push(65 * MS, 1);
    rig.tick(60 * MS);
    // Cycle [5,55) saw exactly one indication: still ok.
    assert_eq!(rig.cluster.global_status(0), Some(GlobalStatus::Ok));

    // The held-back heartbeat serves the second cycle.
    rig.tick(110 * MS);
    assert_eq!(rig.cluster.global_status(0), Some(GlobalStatus::Ok));
}

#[test]
fn unanswered_recovery_escalates_to_the_watchdog() {
    // Invariant 10 follow-through: the ticket never resolves.
    let mut rig = Rig::build();
    rig.activate_core(5 * MS);
    rig.tick(10 * MS);
    for tick in [60, 110, 160, 200] {
        rig.tick(tick * MS);
    }
    assert_eq!(rig.cluster.notifier_state(0), Some(NotifierState::WaitingForResponse));

    rig.clock.advance(600 * MS);
    let report = rig.tick(210 * MS);
    assert!(report.recovery_timeout);
    assert_eq!(rig.cluster.notifier_state(0), Some(NotifierState::Timeout));
}
