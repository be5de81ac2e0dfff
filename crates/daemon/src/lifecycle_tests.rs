// SPDX-License-Identifier: Apache-2.0

use super::*;
use fs2::FileExt;
use serial_test::serial;

#[test]
#[serial]
fn startup_takes_the_lock_and_writes_the_pid() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("HALE_STATE_DIR", dir.path());
    std::env::set_var("HALE_LOG_DIR", dir.path());

    let guard = startup("test-daemon").unwrap();
    assert_eq!(guard.state_dir, dir.path());

    let pid_path = dir.path().join("test-daemon.pid");
    let content = std::fs::read_to_string(&pid_path).unwrap();
    assert_eq!(content.trim(), std::process::id().to_string());

    // The lock is exclusive while the guard lives.
    let other = std::fs::OpenOptions::new().write(true).open(&pid_path).unwrap();
    assert!(other.try_lock_exclusive().is_err());

    drop(guard);
    assert!(other.try_lock_exclusive().is_ok());

    std::env::remove_var("HALE_STATE_DIR");
    std::env::remove_var("HALE_LOG_DIR");
}

#[test]
#[serial]
fn second_instance_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("HALE_STATE_DIR", dir.path());
    std::env::set_var("HALE_LOG_DIR", dir.path());

    let _guard = startup("test-daemon").unwrap();
    assert!(matches!(startup("test-daemon"), Err(LifecycleError::AlreadyRunning { .. })));

    std::env::remove_var("HALE_STATE_DIR");
    std::env::remove_var("HALE_LOG_DIR");
}
