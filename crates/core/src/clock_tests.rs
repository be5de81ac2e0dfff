// SPDX-License-Identifier: Apache-2.0

use super::*;

#[test]
fn os_clock_is_monotonic() {
    let clock = OsClock;
    let a = clock.now_ns();
    let b = clock.now_ns();
    assert!(a > 0, "monotonic clock should not report failure");
    assert!(b >= a);
}

#[test]
fn fake_clock_advances() {
    let clock = FakeClock::new(100);
    assert_eq!(clock.now_ns(), 100);
    clock.advance(50);
    assert_eq!(clock.now_ns(), 150);
}

#[test]
fn fake_clock_can_simulate_failure() {
    let clock = FakeClock::default();
    clock.set(0);
    assert_eq!(clock.now_ns(), 0);
}

#[test]
fn fake_clock_is_shared_between_clones() {
    let clock = FakeClock::new(1);
    let other = clock.clone();
    clock.advance(9);
    assert_eq!(other.now_ns(), 10);
}
