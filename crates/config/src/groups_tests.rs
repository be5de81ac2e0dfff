// SPDX-License-Identifier: Apache-2.0

use super::*;
use hale_core::MachineConfig;

const SAMPLE: &str = r#"
[[group]]
name = "/Machine"

[[group.state]]
name = "Off"

[[group.state]]
name = "Run"
processes = ["core-app", "state-manager"]

[[group.process]]
name = "core-app"
executable = "/usr/bin/core-app"
args = ["--verbose"]
env = { APP_MODE = "prod" }
uid = 1000
gid = 1000
comms = "reporting"
startup_timeout_ms = 1000
termination_timeout_ms = 500
execution_error = 7

[[group.process.depends]]
on = "state-manager"
trigger = "running"

[[group.process]]
name = "state-manager"
executable = "/usr/bin/state-manager"
comms = "control-client"

[hm]

[[hm.process]]
process = "/Machine/core-app"
states = ["/Machine/Run"]
execution_errors = [7]

[[hm.monitor]]
name = "core-mon"
process = "/Machine/core-app"
writer_uid = 1000

[[hm.checkpoint]]
name = "heartbeat"
id = 1
monitor = "core-mon"
process = "/Machine/core-app"

[[hm.checkpoint]]
name = "frame-done"
id = 2
monitor = "core-mon"
process = "/Machine/core-app"

[[hm.alive]]
name = "core-alive"
checkpoint = "heartbeat"
reference_cycle_ms = 50
min_indications = 1
max_indications = 10
failed_cycles_tolerance = 2
states = ["/Machine/Run"]
processes = ["/Machine/core-app"]

[[hm.deadline]]
name = "frame-deadline"
source = "heartbeat"
target = "frame-done"
max_deadline_ms = 100
states = ["/Machine/Run"]
processes = ["/Machine/core-app"]

[[hm.logical]]
name = "frame-order"
entries = ["heartbeat"]
finals = ["frame-done"]
states = ["/Machine/Run"]
processes = ["/Machine/core-app"]

[[hm.logical.transition]]
from = "heartbeat"
to = "frame-done"

[[hm.local]]
name = "core-local"
alives = ["core-alive"]
deadlines = ["frame-deadline"]
logicals = ["frame-order"]

[[hm.global]]
name = "machine-global"
locals = ["core-local"]
recoveries = ["machine-recovery"]

[[hm.global.tolerance]]
state = "/Machine/Run"
expired_tolerance_ms = 200

[[hm.recovery]]
name = "machine-recovery"
target = "/Machine/Run"
timeout_ms = 500
"#;

fn load_sample() -> (Vec<hale_core::ProcessGroup>, hale_core::config::HmConfig) {
    load_groups_str(SAMPLE, &MachineConfig::default()).unwrap()
}

#[test]
fn groups_resolve_paths_and_indices() {
    let (groups, _) = load_sample();
    assert_eq!(groups.len(), 1);
    let group = &groups[0];

    assert_eq!(group.name, IdentifierHash::of("/Machine"));
    assert_eq!(group.software_cluster, IdentifierHash::of("MainCluster"));
    // A literal "Off" state exists, so off_state points at its full path.
    assert_eq!(group.off_state, IdentifierHash::of("/Machine/Off"));
    // No "Recovery" state: falls back to the well-known hash.
    assert_eq!(group.recovery_state, RECOVERY_STATE);

    let run = group.state(IdentifierHash::of("/Machine/Run")).unwrap();
    assert_eq!(run.active_processes, vec![0, 1]);

    let core = &group.processes[0];
    assert_eq!(core.process_id, IdentifierHash::of("/Machine/core-app"));
    assert_eq!(core.startup.comms_type, CommsType::Reporting);
    assert_eq!(core.startup.args, vec!["--verbose".to_string()]);
    assert_eq!(core.startup.env, vec![("APP_MODE".to_string(), "prod".to_string())]);
    assert_eq!(core.manager.startup_timeout, Duration::from_millis(1000));
    assert_eq!(core.manager.execution_error_code, 7);

    assert_eq!(core.dependencies.len(), 1);
    let dep = &core.dependencies[0];
    assert_eq!(dep.trigger, ProcessState::Running);
    assert_eq!(dep.target_index, 1);
    assert_eq!(dep.target_process, IdentifierHash::of("/Machine/state-manager"));

    // unique_index is a running counter across all processes.
    assert_eq!(group.processes[0].unique_index, 0);
    assert_eq!(group.processes[1].unique_index, 1);
}

#[test]
fn hm_references_resolve_to_indices() {
    let (_, hm) = load_sample();

    assert_eq!(hm.processes.len(), 1);
    assert_eq!(hm.monitors[0].process, 0);
    assert_eq!(hm.monitors[0].ring_capacity, MachineConfig::default().checkpoint_ring_capacity);
    assert_eq!(hm.checkpoints.len(), 2);
    assert_eq!(hm.checkpoints[0].monitor, 0);

    let alive = &hm.alives[0];
    assert_eq!(alive.checkpoint, 0);
    assert_eq!(alive.reference_cycle_ns, 50_000_000);
    assert!(!alive.min_disabled);
    assert!(!alive.max_disabled);
    assert_eq!(alive.buffer_size, MachineConfig::default().supervision_buffer_size);

    let deadline = &hm.deadlines[0];
    assert_eq!((deadline.source, deadline.target), (0, 1));
    assert!(deadline.min_disabled);
    assert!(!deadline.max_disabled);
    assert_eq!(deadline.max_deadline_ns, 100_000_000);

    let logical = &hm.logicals[0];
    assert_eq!(logical.nodes.len(), 2);
    assert_eq!(logical.entries, vec![0]);
    assert!(logical.nodes[1].is_final);
    assert_eq!(logical.nodes[0].successors, vec![1]);

    let local = &hm.locals[0];
    assert_eq!(
        local.elementaries,
        vec![
            (SupervisionKind::Alive, 0),
            (SupervisionKind::Deadline, 0),
            (SupervisionKind::Logical, 0)
        ]
    );

    let global = &hm.globals[0];
    assert_eq!(global.locals, vec![0]);
    assert_eq!(global.expired_tolerances_ns, vec![200_000_000]);
    assert_eq!(global.recoveries, vec![0]);

    assert_eq!(hm.recoveries[0].timeout_ns, 500_000_000);
}

#[test]
fn absent_tolerance_means_never() {
    let raw = r#"
[hm]
[[hm.global]]
name = "g"
[[hm.global.tolerance]]
state = "/PG/Run"
"#;
    let (_, hm) = load_groups_str(raw, &MachineConfig::default()).unwrap();
    assert_eq!(hm.globals[0].expired_tolerances_ns, vec![u64::MAX]);
}

#[test]
fn unknown_dependency_target_is_reported() {
    let raw = r#"
[[group]]
name = "/PG"
[[group.process]]
name = "a"
executable = "/bin/a"
[[group.process.depends]]
on = "missing"
trigger = "running"
"#;
    let err = load_groups_str(raw, &MachineConfig::default()).unwrap_err();
    match err {
        GroupsError::Load(inner) => {
            assert!(matches!(*inner, LoadError::UnknownReference { what: "process", .. }));
        }
        GroupsError::Parse(_) => panic!("expected reference error"),
    }
}

#[test]
fn unknown_checkpoint_in_alive_is_reported() {
    let raw = r#"
[hm]
[[hm.alive]]
name = "a"
checkpoint = "nope"
reference_cycle_ms = 10
"#;
    assert!(load_groups_str(raw, &MachineConfig::default()).is_err());
}
