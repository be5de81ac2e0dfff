// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::manager::NoopNudge;
use crate::osal::FakeProcessOps;
use hale_core::config::{ManagerConfig, OsProcess, ProcessGroup, ProcessGroupState, StartupConfig};
use hale_core::{CommsType, IdentifierHash};
use hale_shm::SyncBlock;
use std::time::{Duration, Instant};

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

fn group() -> ProcessGroup {
    ProcessGroup {
        name: IdentifierHash::of("/PG"),
        software_cluster: IdentifierHash::of("MainCluster"),
        off_state: IdentifierHash::of("/PG/Off"),
        recovery_state: hale_core::RECOVERY_STATE,
        states: vec![
            ProcessGroupState { name: IdentifierHash::of("/PG/Off"), active_processes: vec![] },
            ProcessGroupState { name: IdentifierHash::of("/PG/Run"), active_processes: vec![0] },
        ],
        processes: vec![OsProcess {
            process_id: IdentifierHash::of("/PG/p"),
            unique_index: 0,
            startup: StartupConfig::for_executable("/usr/bin/p", "p"),
            manager: ManagerConfig::default(),
            dependencies: Vec::new(),
        }],
    }
}

struct Rig {
    engine: Arc<Engine<FakeProcessOps>>,
    handler: ControlHandler<FakeProcessOps>,
    client: Arc<SyncBlock>,
}

impl Rig {
    fn start() -> Self {
        let engine =
            Engine::new(vec![group()], FakeProcessOps::new(), None, Arc::new(NoopNudge)).unwrap();
        engine.spawn_workers(2).unwrap();
        engine.spawn_reaper().unwrap();

        // A state-manager channel, as if the engine had spawned the SM.
        let (block, _fd) = SyncBlock::create(CommsType::ControlClient).unwrap();
        let client = Arc::new(block);
        engine.register_channel(0, 0, 9999, Arc::clone(&client));

        let handler = ControlHandler::new(Arc::clone(&engine));
        Self { engine, handler, client }
    }

    fn request(&self, code: ControlCode, group: &str, state: &str, future_id: u32) {
        let msg = ControlMessage::request(
            code,
            ProcessGroupStateId::new(IdentifierHash::of(group), IdentifierHash::of(state)),
            future_id,
        );
        // The test pumps scan() instead of posting the global nudge.
        assert!(self.client.control().unwrap().try_post_request(&msg));
    }

    fn response(&self) -> Option<ControlMessage> {
        self.client
            .control()
            .unwrap()
            .wait_response_timeout(Duration::from_millis(10))
            .ok()
            .flatten()
    }

    fn pump_until_response(&mut self) -> ControlMessage {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            self.handler.scan();
            if let Some(msg) = self.response() {
                return msg;
            }
            assert!(Instant::now() < deadline, "no response from the handler");
        }
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}

#[test]
fn set_state_round_trip() {
    let mut rig = Rig::start();
    rig.request(ControlCode::SetStateRequest, "/PG", "/PG/Run", 7);

    let response = rig.pump_until_response();
    assert_eq!(response.decoded_code(), ControlCode::SetStateSuccess);
    assert_eq!(response.client.future_id, 7);
    assert!(wait_until(|| rig.engine.graph(0).state() == crate::graph::GraphState::Success));
}

#[test]
fn set_state_same_state_responses() {
    let mut rig = Rig::start();
    rig.request(ControlCode::SetStateRequest, "/PG", "/PG/Run", 1);
    let first = rig.pump_until_response();
    assert_eq!(first.decoded_code(), ControlCode::SetStateSuccess);

    rig.request(ControlCode::SetStateRequest, "/PG", "/PG/Run", 2);
    let second = rig.pump_until_response();
    assert_eq!(second.decoded_code(), ControlCode::SetStateAlreadyInState);
    assert_eq!(second.client.future_id, 2);
}

#[test]
fn invalid_arguments_response() {
    let mut rig = Rig::start();
    rig.request(ControlCode::SetStateRequest, "/PG", "/PG/Bogus", 3);
    let response = rig.pump_until_response();
    assert_eq!(response.decoded_code(), ControlCode::SetStateInvalidArguments);
}

#[test]
fn validate_process_group_state() {
    let mut rig = Rig::start();
    rig.request(ControlCode::ValidateProcessGroupState, "/PG", "/PG/Run", 4);
    assert_eq!(
        rig.pump_until_response().decoded_code(),
        ControlCode::ValidateProcessGroupStateSuccess
    );

    rig.request(ControlCode::ValidateProcessGroupState, "/PG", "/PG/Missing", 5);
    assert_eq!(
        rig.pump_until_response().decoded_code(),
        ControlCode::ValidateProcessGroupStateFailed
    );
}

#[test]
fn execution_error_query() {
    let mut rig = Rig::start();

    // Defined state: the query fails.
    rig.request(ControlCode::GetExecutionErrorRequest, "/PG", "/PG/Run", 6);
    assert_eq!(rig.pump_until_response().decoded_code(), ControlCode::ExecutionErrorRequestFailed);

    // Unknown group: invalid arguments.
    rig.request(ControlCode::GetExecutionErrorRequest, "/Nope", "/Nope/Run", 7);
    assert_eq!(
        rig.pump_until_response().decoded_code(),
        ControlCode::ExecutionErrorInvalidArguments
    );
}

#[test]
fn initial_state_result_is_parked_until_known() {
    let mut rig = Rig::start();

    rig.request(ControlCode::GetInitialMachineStateRequest, "", "", 8);
    rig.handler.scan();
    // Not answered yet.
    assert!(rig.response().is_none());

    rig.engine.start_initial_transition(IdentifierHash::of("/PG"), IdentifierHash::of("/PG/Run"));
    assert!(wait_until(|| {
        rig.engine.initial_result() == ControlCode::InitialMachineStateSuccess
    }));

    rig.handler.scan();
    let response = rig.response();
    assert_eq!(response.map(|m| m.decoded_code()), Some(ControlCode::InitialMachineStateSuccess));

    // A later request is answered immediately.
    rig.request(ControlCode::GetInitialMachineStateRequest, "", "", 9);
    assert_eq!(
        rig.pump_until_response().decoded_code(),
        ControlCode::InitialMachineStateSuccess
    );
}

#[test]
fn unknown_opcode_is_rejected() {
    let mut rig = Rig::start();
    let mut msg = ControlMessage::default();
    msg.code = 9999;
    assert!(rig.client.control().unwrap().try_post_request(&msg));

    let response = rig.pump_until_response();
    assert_eq!(response.decoded_code(), ControlCode::InvalidRequest);
}
