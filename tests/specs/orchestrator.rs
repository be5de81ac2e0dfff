// SPDX-License-Identifier: Apache-2.0

//! Orchestrator scenarios driven from a loaded configuration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hale_core::{IdentifierHash, MachineConfig, ProcessState};
use hale_launch::manager::NoopNudge;
use hale_launch::{Engine, FakeProcessOps, GraphState, SetStateOutcome};

const GROUPS_TOML: &str = r#"
[[group]]
name = "/Machine"

[[group.state]]
name = "Off"

[[group.state]]
name = "Run"
processes = ["core", "web", "telemetry"]

[[group.state]]
name = "Degraded"
processes = ["core"]

[[group.process]]
name = "core"
executable = "/usr/bin/core"
startup_timeout_ms = 200
termination_timeout_ms = 100
execution_error = 11

[[group.process]]
name = "web"
executable = "/usr/bin/web"
startup_timeout_ms = 200
termination_timeout_ms = 100
execution_error = 12

[[group.process.depends]]
on = "core"
trigger = "running"

[[group.process]]
name = "telemetry"
executable = "/usr/bin/telemetry"
startup_timeout_ms = 200
termination_timeout_ms = 100
execution_error = 13

[[group.process.depends]]
on = "web"
trigger = "running"
"#;

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

struct Rig {
    engine: Arc<Engine<FakeProcessOps>>,
}

impl Rig {
    fn start() -> Self {
        let (groups, _) =
            hale_config::load_groups_str(GROUPS_TOML, &MachineConfig::default()).unwrap();
        let engine =
            Engine::new(groups, FakeProcessOps::new(), None, Arc::new(NoopNudge)).unwrap();
        engine.spawn_workers(4).unwrap();
        engine.spawn_reaper().unwrap();
        Self { engine }
    }

    fn set_state(&self, state: &str) -> SetStateOutcome {
        self.engine.set_state(
            IdentifierHash::of("/Machine"),
            IdentifierHash::of(state),
            hale_launch::graph::Origin::Internal,
        )
    }

    fn settle(&self, expect: GraphState) {
        assert!(
            wait_until(|| self.engine.graph(0).state() == expect),
            "graph stuck in {:?}",
            self.engine.graph(0).state()
        );
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}

#[test]
fn full_chain_starts_in_dependency_order() {
    let rig = Rig::start();
    assert_eq!(rig.set_state("/Machine/Run"), SetStateOutcome::Started);
    rig.settle(GraphState::Success);

    assert_eq!(rig.engine.ops().spawn_order(), vec!["core", "web", "telemetry"]);
    for node in rig.engine.graph(0).nodes() {
        assert_eq!(node.state(), ProcessState::Running);
    }
}

#[test]
fn degrade_stops_the_dependents_only() {
    let rig = Rig::start();
    rig.set_state("/Machine/Run");
    rig.settle(GraphState::Success);

    assert_eq!(rig.set_state("/Machine/Degraded"), SetStateOutcome::Started);
    rig.settle(GraphState::Success);

    assert_eq!(rig.engine.ops().alive(), vec!["core".to_string()]);
    assert_eq!(rig.engine.graph(0).current_state(), IdentifierHash::of("/Machine/Degraded"));
}

#[test]
fn off_state_quiesces_everything() {
    let rig = Rig::start();
    rig.set_state("/Machine/Run");
    rig.settle(GraphState::Success);

    assert_eq!(rig.set_state("/Machine/Off"), SetStateOutcome::Started);
    rig.settle(GraphState::Success);
    assert!(rig.engine.ops().alive().is_empty());
}

#[test]
fn repeated_request_is_a_no_op() {
    let rig = Rig::start();
    rig.set_state("/Machine/Run");
    rig.settle(GraphState::Success);
    let spawned = rig.engine.ops().spawn_order().len();

    assert_eq!(rig.set_state("/Machine/Run"), SetStateOutcome::AlreadyInState);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(rig.engine.ops().spawn_order().len(), spawned);
}

#[test]
fn crash_outside_transition_leads_to_undefined() {
    let rig = Rig::start();
    rig.set_state("/Machine/Run");
    rig.settle(GraphState::Success);

    let pid = rig.engine.ops().pid_of("web").unwrap();
    rig.engine.ops().crash(pid, 9);
    rig.settle(GraphState::Undefined);

    // The execution-error query now reports web's configured code.
    assert_eq!(
        rig.engine.execution_error(IdentifierHash::of("/Machine")),
        Some(Some(12))
    );

    // Only a new set-state leaves Undefined.
    assert_eq!(rig.set_state("/Machine/Degraded"), SetStateOutcome::Started);
    rig.settle(GraphState::Success);
}

#[test]
fn superseding_request_wins() {
    let rig = Rig::start();
    rig.set_state("/Machine/Run");
    let second = rig.set_state("/Machine/Degraded");
    assert!(matches!(second, SetStateOutcome::Pending | SetStateOutcome::Started));

    rig.settle(GraphState::Success);
    assert_eq!(rig.engine.graph(0).current_state(), IdentifierHash::of("/Machine/Degraded"));
    assert_eq!(rig.engine.ops().alive(), vec!["core".to_string()]);
}
