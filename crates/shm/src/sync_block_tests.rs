// SPDX-License-Identifier: Apache-2.0

use super::*;
use std::os::fd::AsFd;

#[test]
fn running_report_is_exactly_once() {
    let (block, _fd) = SyncBlock::create(CommsType::Reporting).unwrap();
    assert!(block.sync().report_running());
    assert!(!block.sync().report_running());

    assert_eq!(
        block.sync().wait_running(Duration::from_millis(50)).unwrap(),
        WaitOutcome::Acquired
    );
}

#[test]
fn wait_running_times_out_without_report() {
    let (block, _fd) = SyncBlock::create(CommsType::Reporting).unwrap();
    assert_eq!(
        block.sync().wait_running(Duration::from_millis(20)).unwrap(),
        WaitOutcome::TimedOut
    );
}

#[test]
fn child_mapping_shares_the_block() {
    let (server, fd) = SyncBlock::create(CommsType::Reporting).unwrap();
    let child = SyncBlock::from_fd(fd.as_fd()).unwrap();

    assert_eq!(child.sync().comms_type(), CommsType::Reporting);
    assert!(child.sync().report_running());
    assert_eq!(
        server.sync().wait_running(Duration::from_millis(50)).unwrap(),
        WaitOutcome::Acquired
    );

    server.sync().set_pid(4321);
    assert_eq!(child.sync().pid(), 4321);
}

#[test]
fn termination_notice_flows_lm_to_child() {
    let (server, fd) = SyncBlock::create(CommsType::Reporting).unwrap();
    let child = SyncBlock::from_fd(fd.as_fd()).unwrap();

    assert!(!child.sync().termination_requested());
    server.sync().post_terminate_notice();
    assert!(child.sync().termination_requested());
    assert!(!child.sync().termination_requested());
}

#[test]
fn control_channel_only_for_state_managers() {
    let (reporting, _fd) = SyncBlock::create(CommsType::Reporting).unwrap();
    assert!(reporting.control().is_none());

    let (manager, fd) = SyncBlock::create(CommsType::ControlClient).unwrap();
    assert!(manager.control().is_some());

    let child = SyncBlock::from_fd(fd.as_fd()).unwrap();
    assert!(child.control().is_some());
}

#[test]
fn rearm_clears_report_and_notices() {
    let (block, _fd) = SyncBlock::create(CommsType::Reporting).unwrap();
    block.sync().report_running();
    block.sync().post_terminate_notice();

    block.sync().rearm();
    assert_eq!(
        block.sync().wait_running(Duration::from_millis(10)).unwrap(),
        WaitOutcome::TimedOut
    );
    assert!(!block.sync().termination_requested());
    // Reporting works again after rearm.
    assert!(block.sync().report_running());
}
