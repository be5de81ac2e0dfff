// SPDX-License-Identifier: Apache-2.0

use super::*;
use hale_core::{FakeClock, SupervisionKind};

struct FakeHandler {
    tickets: Vec<RecoveryTicket>,
    requests: Vec<(IdentifierHash, IdentifierHash)>,
    give_ticket: bool,
}

impl FakeHandler {
    fn new() -> Self {
        Self { tickets: Vec::new(), requests: Vec::new(), give_ticket: true }
    }
}

impl RecoveryHandler for FakeHandler {
    fn send_request(
        &mut self,
        group: IdentifierHash,
        state: IdentifierHash,
    ) -> Option<RecoveryTicket> {
        self.requests.push((group, state));
        if self.give_ticket {
            let ticket = RecoveryTicket::new();
            self.tickets.push(ticket.clone());
            Some(ticket)
        } else {
            None
        }
    }
}

fn config() -> RecoveryConfig {
    RecoveryConfig {
        name: "recovery".into(),
        target_path: "/Machine/Recovery".into(),
        timeout_ns: 100,
    }
}

fn info() -> SupervisionErrorInfo {
    SupervisionErrorInfo { execution_error: 7, kind: SupervisionKind::Alive }
}

#[test]
fn parses_target_path() {
    let notifier = RecoveryNotifier::new(&config()).unwrap();
    assert_eq!(notifier.state(), NotifierState::Idle);
}

#[test]
fn invalid_target_path_is_rejected() {
    let bad = RecoveryConfig { target_path: "NoSlash".into(), ..config() };
    assert!(RecoveryNotifier::new(&bad).is_err());
    let bad = RecoveryConfig { target_path: "/OnlyGroup".into(), ..config() };
    assert!(RecoveryNotifier::new(&bad).is_err());
}

#[test]
fn request_flow_to_success() {
    let clock = FakeClock::new(1_000);
    let mut handler = FakeHandler::new();
    let mut notifier = RecoveryNotifier::new(&config()).unwrap();

    notifier.send(&info());
    assert_eq!(notifier.state(), NotifierState::Sending);

    // First trigger issues the request and starts waiting.
    notifier.cyclic_trigger(&clock, &mut handler);
    assert_eq!(notifier.state(), NotifierState::WaitingForResponse);
    assert_eq!(
        handler.requests,
        vec![(IdentifierHash::of("/Machine"), IdentifierHash::of("/Machine/Recovery"))]
    );

    handler.tickets[0].resolve(TicketOutcome::Success);
    notifier.cyclic_trigger(&clock, &mut handler);
    assert_eq!(notifier.state(), NotifierState::Idle);
    assert!(!notifier.is_final_timeout_reached());
}

#[test]
fn pending_response_times_out() {
    let clock = FakeClock::new(1_000);
    let mut handler = FakeHandler::new();
    let mut notifier = RecoveryNotifier::new(&config()).unwrap();

    notifier.send(&info());
    notifier.cyclic_trigger(&clock, &mut handler);

    // Within the timeout: still waiting.
    clock.advance(50);
    notifier.cyclic_trigger(&clock, &mut handler);
    assert_eq!(notifier.state(), NotifierState::WaitingForResponse);

    clock.advance(100);
    notifier.cyclic_trigger(&clock, &mut handler);
    assert_eq!(notifier.state(), NotifierState::Timeout);
    assert!(notifier.is_final_timeout_reached());
}

#[test]
fn error_response_is_a_timeout() {
    let clock = FakeClock::new(1_000);
    let mut handler = FakeHandler::new();
    let mut notifier = RecoveryNotifier::new(&config()).unwrap();

    notifier.send(&info());
    notifier.cyclic_trigger(&clock, &mut handler);
    handler.tickets[0].resolve(TicketOutcome::Error);
    notifier.cyclic_trigger(&clock, &mut handler);
    assert!(notifier.is_final_timeout_reached());
}

#[test]
fn missing_ticket_is_a_timeout() {
    let clock = FakeClock::new(1_000);
    let mut handler = FakeHandler::new();
    handler.give_ticket = false;
    let mut notifier = RecoveryNotifier::new(&config()).unwrap();

    notifier.send(&info());
    notifier.cyclic_trigger(&clock, &mut handler);
    assert!(notifier.is_final_timeout_reached());
}

#[test]
fn dummy_notifier_fires_immediately() {
    let mut notifier = RecoveryNotifier::dummy();
    assert!(!notifier.is_final_timeout_reached());
    notifier.send(&info());
    assert!(notifier.is_final_timeout_reached());
}

#[test]
fn duplicate_send_while_busy_is_ignored() {
    let clock = FakeClock::new(1_000);
    let mut handler = FakeHandler::new();
    let mut notifier = RecoveryNotifier::new(&config()).unwrap();

    notifier.send(&info());
    notifier.cyclic_trigger(&clock, &mut handler);
    notifier.send(&info());
    notifier.cyclic_trigger(&clock, &mut handler);
    // Only one request went out.
    assert_eq!(handler.requests.len(), 1);
}
