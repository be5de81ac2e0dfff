// SPDX-License-Identifier: Apache-2.0

use super::*;
use hale_core::config::{ManagerConfig, StartupConfig};
use hale_core::IdentifierHash;
use yare::parameterized;

fn node() -> ProcessInfoNode {
    let config = OsProcess {
        process_id: IdentifierHash::of("/PG/p"),
        unique_index: 0,
        startup: StartupConfig::for_executable("/bin/true", "p"),
        manager: ManagerConfig { restart_attempts: 2, ..ManagerConfig::default() },
        dependencies: Vec::new(),
    };
    ProcessInfoNode::new(0, config).unwrap()
}

#[test]
fn starts_idle() {
    let node = node();
    assert_eq!(node.state(), ProcessState::Idle);
    assert_eq!(node.pid(), 0);
}

#[parameterized(
    start = { ProcessState::Idle, ProcessState::Starting, true },
    run = { ProcessState::Starting, ProcessState::Running, true },
    stop_requested = { ProcessState::Running, ProcessState::Terminating, true },
    crash_while_starting = { ProcessState::Starting, ProcessState::Terminated, true },
    exit = { ProcessState::Terminating, ProcessState::Terminated, true },
    skip_starting = { ProcessState::Idle, ProcessState::Running, false },
    terminate_idle = { ProcessState::Idle, ProcessState::Terminating, false },
    backwards = { ProcessState::Running, ProcessState::Starting, false },
    terminate_after_exit = { ProcessState::Terminated, ProcessState::Terminating, false },
)]
fn transition_rules(from: ProcessState, to: ProcessState, allowed: bool) {
    let node = node();
    // Drive the node into `from` through the valid chain.
    let chain = [
        ProcessState::Starting,
        ProcessState::Running,
        ProcessState::Terminating,
        ProcessState::Terminated,
    ];
    for state in chain {
        if node.state() == from {
            break;
        }
        assert!(node.try_set_state(state));
    }
    assert_eq!(node.state(), from);
    assert_eq!(node.try_set_state(to), allowed);
}

#[test]
fn dependency_counter_reports_zero_crossing() {
    let node = node();
    node.set_dependencies(2);
    assert!(!node.dependency_satisfied());
    assert!(node.dependency_satisfied());
}

#[test]
fn restart_attempts_are_bounded() {
    let node = node();
    assert!(node.take_restart_attempt());
    assert!(node.take_restart_attempt());
    assert!(!node.take_restart_attempt());

    node.reset_restart_counter();
    assert!(node.take_restart_attempt());
}

#[test]
fn terminator_handshake() {
    let node = node();
    assert!(!node.wait_terminated(std::time::Duration::from_millis(5)));
    node.signal_terminated();
    assert!(node.wait_terminated(std::time::Duration::from_millis(50)));
}

#[test]
fn successor_lists_split_by_trigger() {
    let mut node = node();
    node.add_successor(Successor { index: 1, trigger: ProcessState::Running });
    node.add_successor(Successor { index: 2, trigger: ProcessState::Terminated });
    node.add_successor(Successor { index: 3, trigger: ProcessState::Running });

    assert_eq!(node.dependent_on_running(), &[1, 3]);
    assert_eq!(node.dependent_on_terminating(), &[2]);
}

#[test]
fn reset_to_idle_clears_pid() {
    let node = node();
    assert!(node.try_set_state(ProcessState::Starting));
    node.set_pid(42);
    assert!(node.try_set_state(ProcessState::Terminated));
    node.reset_to_idle();
    assert_eq!(node.state(), ProcessState::Idle);
    assert_eq!(node.pid(), 0);
}
