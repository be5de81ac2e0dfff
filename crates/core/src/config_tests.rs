// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::process::ProcessState;

fn process(name: &str) -> OsProcess {
    OsProcess {
        process_id: IdentifierHash::of(name),
        unique_index: 0,
        startup: StartupConfig::for_executable("/usr/bin/true", name),
        manager: ManagerConfig::default(),
        dependencies: Vec::new(),
    }
}

fn group_with(processes: Vec<OsProcess>, states: Vec<ProcessGroupState>) -> ProcessGroup {
    ProcessGroup {
        name: IdentifierHash::of("/PG"),
        software_cluster: IdentifierHash::of("MainCluster"),
        off_state: crate::id::OFF_STATE,
        recovery_state: crate::id::RECOVERY_STATE,
        states,
        processes,
    }
}

#[test]
fn valid_group_passes() {
    let group = group_with(
        vec![process("a"), process("b")],
        vec![
            ProcessGroupState { name: crate::id::OFF_STATE, active_processes: vec![] },
            ProcessGroupState { name: IdentifierHash::of("/PG/Run"), active_processes: vec![0, 1] },
        ],
    );
    let set = ConfigSet { groups: vec![group], ..Default::default() };
    assert_eq!(set.validate(), Ok(()));
}

#[test]
fn state_index_out_of_range_is_rejected() {
    let group = group_with(
        vec![process("a")],
        vec![ProcessGroupState { name: IdentifierHash::of("/PG/Run"), active_processes: vec![1] }],
    );
    let set = ConfigSet { groups: vec![group], ..Default::default() };
    assert!(matches!(set.validate(), Err(ConfigError::StateProcessIndex { index: 1, .. })));
}

#[test]
fn dependency_index_out_of_range_is_rejected() {
    let mut p = process("a");
    p.dependencies.push(Dependency {
        trigger: ProcessState::Running,
        target_process: IdentifierHash::of("b"),
        target_index: 7,
    });
    let set = ConfigSet { groups: vec![group_with(vec![p], vec![])], ..Default::default() };
    assert!(matches!(set.validate(), Err(ConfigError::DependencyIndex { index: 7, .. })));
}

#[test]
fn dependency_trigger_must_be_running_or_terminated() {
    let mut a = process("a");
    a.dependencies.push(Dependency {
        trigger: ProcessState::Starting,
        target_process: IdentifierHash::of("b"),
        target_index: 1,
    });
    let set = ConfigSet {
        groups: vec![group_with(vec![a, process("b")], vec![])],
        ..Default::default()
    };
    assert!(matches!(
        set.validate(),
        Err(ConfigError::DependencyTrigger { trigger: ProcessState::Starting, .. })
    ));
}

#[test]
fn argv_limit_is_enforced() {
    let mut p = process("a");
    p.startup.args = (0..=crate::limits::MAX_ARGS).map(|i| format!("arg{i}")).collect();
    let set = ConfigSet { groups: vec![group_with(vec![p], vec![])], ..Default::default() };
    assert!(matches!(set.validate(), Err(ConfigError::ProcessLimit { what: "argv entries", .. })));
}

#[test]
fn zero_reference_cycle_is_rejected() {
    let hm = HmConfig {
        processes: vec![SupervisedProcessConfig {
            name: "app".into(),
            process_id: IdentifierHash::of("app"),
            is_platform: false,
            pg_states: vec![],
            execution_errors: vec![],
        }],
        monitors: vec![MonitorInterfaceConfig {
            name: "app-mon".into(),
            writer_uid: 1000,
            process: 0,
            ring_capacity: 8,
        }],
        checkpoints: vec![CheckpointConfig { name: "cp".into(), id: 1, monitor: 0, process: 0 }],
        alives: vec![AliveConfig {
            name: "alive".into(),
            checkpoint: 0,
            reference_cycle_ns: 0,
            min_indications: 1,
            max_indications: 1,
            min_disabled: false,
            max_disabled: false,
            failed_cycles_tolerance: 0,
            buffer_size: 8,
            pg_states: vec![],
            processes: vec![0],
        }],
        ..Default::default()
    };
    let set = ConfigSet { hm, ..Default::default() };
    assert!(matches!(
        set.validate(),
        Err(ConfigError::SupervisionParameter { what: "reference_cycle_ns must be non-zero", .. })
    ));
}

#[test]
fn global_tolerances_must_pair_with_states() {
    let hm = HmConfig {
        globals: vec![GlobalConfig {
            name: "global".into(),
            locals: vec![],
            pg_states: vec![IdentifierHash::of("/PG/Run")],
            expired_tolerances_ns: vec![],
            buffer_size: 8,
            recoveries: vec![],
        }],
        ..Default::default()
    };
    let set = ConfigSet { hm, ..Default::default() };
    assert!(matches!(set.validate(), Err(ConfigError::SupervisionParameter { .. })));
}

#[test]
fn reload_is_a_stub() {
    let mut set = ConfigSet::default();
    assert_eq!(set.reload(), Err(ConfigError::Unsupported));
}

#[test]
fn group_lookups() {
    let group = group_with(
        vec![process("a")],
        vec![ProcessGroupState { name: IdentifierHash::of("/PG/Run"), active_processes: vec![0] }],
    );
    assert!(group.state(IdentifierHash::of("/PG/Run")).is_some());
    assert!(group.state(IdentifierHash::of("/PG/Other")).is_none());
    assert_eq!(group.process_index(IdentifierHash::of("a")), Some(0));
    assert_eq!(group.process_index(IdentifierHash::of("zz")), None);
}
