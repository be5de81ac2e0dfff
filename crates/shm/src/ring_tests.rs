// SPDX-License-Identifier: Apache-2.0

use super::*;
use nix::sys::stat::Mode;

use hale_core::wire::CheckpointRecord;

fn ring(tag: &str, capacity: usize) -> ShmRing<CheckpointRecord> {
    let name = format!("/hale-test-{}-ring-{}", std::process::id(), tag);
    let region = ShmRegion::create(
        &name,
        ShmRing::<CheckpointRecord>::bytes_required(capacity),
        Mode::from_bits_truncate(0o600),
    )
    .unwrap();
    ShmRing::create_in(region, capacity).unwrap()
}

#[test]
fn enqueue_dequeue_fifo() {
    let ring = ring("fifo", 4);
    assert!(ring.try_enqueue(CheckpointRecord::new(10, 1)));
    assert!(ring.try_enqueue(CheckpointRecord::new(20, 2)));

    assert_eq!(ring.try_dequeue(), Some(CheckpointRecord::new(10, 1)));
    assert_eq!(ring.try_dequeue(), Some(CheckpointRecord::new(20, 2)));
    assert_eq!(ring.try_dequeue(), None);
}

#[test]
fn full_ring_sets_sticky_overflow() {
    let ring = ring("overflow", 2);
    assert!(ring.try_enqueue(CheckpointRecord::new(1, 1)));
    assert!(ring.try_enqueue(CheckpointRecord::new(2, 2)));
    assert!(!ring.try_enqueue(CheckpointRecord::new(3, 3)));

    assert!(ring.overflow(false));
    // Sticky: still set after the ring drains.
    ring.try_dequeue();
    assert!(ring.overflow(true));
    assert!(!ring.overflow(false));
}

#[test]
fn peek_does_not_consume() {
    let ring = ring("peek", 2);
    ring.try_enqueue(CheckpointRecord::new(5, 9));

    assert_eq!(ring.try_peek(|rec| rec.checkpoint_id), Some(9));
    assert_eq!(ring.len(), 1);
    assert!(ring.try_pop());
    assert!(ring.is_empty());
    assert!(!ring.try_pop());
}

#[test]
fn wraps_around() {
    let ring = ring("wrap", 2);
    for i in 0..10u32 {
        assert!(ring.try_enqueue(CheckpointRecord::new(i as u64, i)));
        assert_eq!(ring.try_dequeue(), Some(CheckpointRecord::new(i as u64, i)));
    }
    assert!(!ring.overflow(false));
}

#[test]
fn open_checks_element_size() {
    let name = format!("/hale-test-{}-ring-mismatch", std::process::id());
    let region = ShmRegion::create(
        &name,
        ShmRing::<CheckpointRecord>::bytes_required(4),
        Mode::from_bits_truncate(0o600),
    )
    .unwrap();
    let _server: ShmRing<CheckpointRecord> = ShmRing::create_in(region, 4).unwrap();

    let client_region = ShmRegion::open(&name).unwrap();
    let result: Result<ShmRing<u64>, _> = ShmRing::open_in(client_region);
    assert!(matches!(result, Err(ShmError::LayoutMismatch { .. })));
}

#[test]
fn open_sees_producer_data() {
    let name = format!("/hale-test-{}-ring-open", std::process::id());
    let region = ShmRegion::create(
        &name,
        ShmRing::<CheckpointRecord>::bytes_required(8),
        Mode::from_bits_truncate(0o600),
    )
    .unwrap();
    let server: ShmRing<CheckpointRecord> = ShmRing::create_in(region, 8).unwrap();
    server.try_enqueue(CheckpointRecord::new(77, 3));

    let client: ShmRing<CheckpointRecord> =
        ShmRing::open_in(ShmRegion::open(&name).unwrap()).unwrap();
    assert_eq!(client.capacity(), 8);
    assert_eq!(client.try_dequeue(), Some(CheckpointRecord::new(77, 3)));
    assert!(server.is_empty());
}

#[test]
fn open_without_init_times_out() {
    let name = format!("/hale-test-{}-ring-noinit", std::process::id());
    let region = ShmRegion::create(
        &name,
        ShmRing::<CheckpointRecord>::bytes_required(4),
        Mode::from_bits_truncate(0o600),
    )
    .unwrap();
    // No create_in: the header stays zeroed.
    let client_region = ShmRegion::open(&name).unwrap();
    let result: Result<ShmRing<CheckpointRecord>, _> = ShmRing::open_in(client_region);
    assert!(matches!(result, Err(ShmError::NotInitialized)));
    drop(region);
}
