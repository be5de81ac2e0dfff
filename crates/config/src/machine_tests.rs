// SPDX-License-Identifier: Apache-2.0

use super::*;

#[test]
fn defaults_apply() {
    let machine = load_machine_str("").unwrap();
    assert_eq!(machine.cycle, Duration::from_millis(10));
    assert_eq!(machine.watchdog_device, None);
    assert_eq!(machine.supervision_buffer_size, 64);
    assert_eq!(machine.checkpoint_ring_capacity, hale_core::limits::CHECKPOINT_RING_CAPACITY);
    assert_eq!(machine.machine_group, None);
}

#[test]
fn full_machine_file() {
    let machine = load_machine_str(
        r#"
cycle_ms = 5
watchdog_device = "/dev/watchdog0"
supervision_buffer_size = 128
checkpoint_ring_capacity = 1024
machine_group = "/Machine"
initial_state = "/Machine/Startup"
"#,
    )
    .unwrap();
    assert_eq!(machine.cycle, Duration::from_millis(5));
    assert_eq!(machine.watchdog_device, Some(PathBuf::from("/dev/watchdog0")));
    assert_eq!(machine.supervision_buffer_size, 128);
    assert_eq!(machine.checkpoint_ring_capacity, 1024);
    assert_eq!(machine.machine_group, Some(IdentifierHash::of("/Machine")));
    assert_eq!(machine.initial_state, Some(IdentifierHash::of("/Machine/Startup")));
}

#[test]
fn unknown_keys_are_rejected() {
    assert!(load_machine_str("cycle = 10").is_err());
}
