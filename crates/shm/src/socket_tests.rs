// SPDX-License-Identifier: Apache-2.0

use super::*;
use hale_core::wire::PosixProcessRecord;
use hale_core::{IdentifierHash, ProcessState};

fn record(n: u64) -> PosixProcessRecord {
    PosixProcessRecord::new(
        IdentifierHash::of("proc"),
        ProcessState::Running,
        IdentifierHash::of("state"),
        n,
    )
}

#[test]
fn server_to_client_transfer() {
    let name = format!("/hale-test-{}-socket", std::process::id());
    let server: ShmSocket<PosixProcessRecord> = ShmSocket::create(&name, 8, 0o666).unwrap();
    let client: ShmSocket<PosixProcessRecord> = ShmSocket::connect(&name).unwrap();

    assert!(server.try_send(record(1)));
    assert!(server.try_send(record(2)));

    assert_eq!(client.try_receive(), Some(record(1)));
    assert_eq!(client.try_peek(|r| r.timestamp_ns()), Some(2));
    assert!(client.try_pop());
    assert!(client.is_empty());
}

#[test]
fn connect_to_missing_socket_fails() {
    let name = format!("/hale-test-{}-socket-missing", std::process::id());
    let result: Result<ShmSocket<PosixProcessRecord>, _> = ShmSocket::connect(&name);
    assert!(matches!(result, Err(ShmError::Open { .. })));
}

#[test]
fn overflow_is_visible_to_consumer() {
    let name = format!("/hale-test-{}-socket-loss", std::process::id());
    let server: ShmSocket<PosixProcessRecord> = ShmSocket::create(&name, 1, 0o666).unwrap();
    let client: ShmSocket<PosixProcessRecord> = ShmSocket::connect(&name).unwrap();

    assert!(server.try_send(record(1)));
    assert!(!server.try_send(record(2)));
    assert!(client.overflow(true));
    assert!(!client.overflow(false));
}
