// SPDX-License-Identifier: Apache-2.0

//! End-to-end flow over the real shared-memory ring: the orchestrator
//! publishes process states, the Health Monitor's reader mirrors them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hale_core::limits::PROCESS_STATE_SHM_NAME;
use hale_core::wire::PosixProcessRecord;
use hale_core::{IdentifierHash, MachineConfig, ProcessState};
use hale_health::{ClusterHandler, FakeCheckpointSource, ProcessStateReader};
use hale_launch::manager::NoopNudge;
use hale_launch::{Engine, FakeProcessOps, GraphState, ProcessStateNotifier};
use hale_shm::ShmSocket;
use serial_test::serial;

const GROUPS_TOML: &str = r#"
[[group]]
name = "/Machine"

[[group.state]]
name = "Off"

[[group.state]]
name = "Run"
processes = ["core"]

[[group.process]]
name = "core"
executable = "/usr/bin/core"
comms = "reporting"
startup_timeout_ms = 500
termination_timeout_ms = 200

[hm]

[[hm.process]]
process = "/Machine/core"
states = ["/Machine/Run"]
execution_errors = [11]
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

#[test]
#[serial]
fn process_states_flow_from_lm_to_hm() {
    let (groups, hm) =
        hale_config::load_groups_str(GROUPS_TOML, &MachineConfig::default()).unwrap();

    // LM side: engine plus the real ring.
    let notifier = ProcessStateNotifier::create().unwrap();
    let engine =
        Engine::new(groups, FakeProcessOps::new(), Some(notifier), Arc::new(NoopNudge)).unwrap();
    engine.spawn_workers(2).unwrap();
    engine.spawn_reaper().unwrap();

    // HM side: reader over the same ring.
    let source = ShmSocket::<PosixProcessRecord>::connect(PROCESS_STATE_SHM_NAME).unwrap();
    let mut reader = ProcessStateReader::new(source);
    let mut cluster: ClusterHandler<FakeCheckpointSource> =
        ClusterHandler::build(&hm, |_| Ok(FakeCheckpointSource::new())).unwrap();

    engine.set_state(
        IdentifierHash::of("/Machine"),
        IdentifierHash::of("/Machine/Run"),
        hale_launch::graph::Origin::Internal,
    );
    assert!(wait_until(|| engine.graph(0).state() == GraphState::Success));

    // Drain the ring into the mirrors.
    cluster.drain_process_states(&mut reader, u64::MAX);
    let core = cluster.process_index(IdentifierHash::of("/Machine/core")).unwrap();
    assert_eq!(cluster.process_state(core), Some(ProcessState::Running));

    // Stop the group: the mirror follows through Terminating/Terminated.
    engine.set_state(
        IdentifierHash::of("/Machine"),
        IdentifierHash::of("/Machine/Off"),
        hale_launch::graph::Origin::Internal,
    );
    assert!(wait_until(|| engine.graph(0).state() == GraphState::Success
        && engine.graph(0).current_state() == IdentifierHash::of("/Machine/Off")));

    cluster.drain_process_states(&mut reader, u64::MAX);
    assert_eq!(cluster.process_state(core), Some(ProcessState::Terminated));

    engine.shutdown();
}
