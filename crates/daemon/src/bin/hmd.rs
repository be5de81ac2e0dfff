// SPDX-License-Identifier: Apache-2.0

//! hale-hmd: the Health Monitor daemon.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hale_client::{ControlClient, ExecutionState, LifecycleClient, RecoveryClient};
use hale_core::limits::{CHECKPOINT_SHM_PREFIX, PROCESS_STATE_SHM_NAME};
use hale_core::wire::PosixProcessRecord;
use hale_core::{MonotonicClock, OsClock};
use hale_daemon::{startup, ShutdownSignal};
use hale_health::{
    ClusterHandler, HealthError, LogWatchdog, ProcessStateReader, RecoveryHandler, RecoveryTicket,
    Watchdog,
};
use hale_shm::ShmSocket;
use tracing::{error, info, warn};

/// How long to wait for the Launch Manager to create the process-state
/// ring before giving up.
const RING_WAIT: Duration = Duration::from_secs(10);

/// Used when this daemon runs without a control channel: every recovery
/// request times out and the watchdog reaction fires.
struct NoRecovery;

impl RecoveryHandler for NoRecovery {
    fn send_request(
        &mut self,
        _group: hale_core::IdentifierHash,
        _state: hale_core::IdentifierHash,
    ) -> Option<RecoveryTicket> {
        None
    }
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let mut signals = match ShutdownSignal::install() {
        Ok(signals) => signals,
        Err(err) => {
            eprintln!("hale-hmd: installing signal handling failed: {err}");
            return 1;
        }
    };

    let _guard = match startup("hmd") {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("hale-hmd: {err}");
            return 1;
        }
    };

    let config = match hale_config::load() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "loading configuration failed");
            return 1;
        }
    };

    // The Launch Manager owns the process-state ring; wait for it briefly.
    let source = {
        let deadline = Instant::now() + RING_WAIT;
        loop {
            match ShmSocket::<PosixProcessRecord>::connect(PROCESS_STATE_SHM_NAME) {
                Ok(socket) => break socket,
                Err(err) if Instant::now() >= deadline => {
                    error!(%err, "process-state ring unavailable");
                    return 1;
                }
                Err(_) => std::thread::sleep(Duration::from_millis(100)),
            }
        }
    };
    let mut reader = ProcessStateReader::new(source);

    let mut cluster = match ClusterHandler::build(&config.hm, |monitor| {
        let name = format!("{CHECKPOINT_SHM_PREFIX}{}", monitor.name);
        ShmSocket::create_for_uid(&name, monitor.ring_capacity as usize, monitor.writer_uid)
            .map_err(|source| HealthError::MonitorSetup { name: monitor.name.to_string(), source })
    }) {
        Ok(cluster) => cluster,
        Err(err) => {
            error!(%err, "building the supervision cluster failed");
            return 1;
        }
    };

    // Report Running when spawned by the Launch Manager; the control
    // channel then carries the recovery requests.
    let lifecycle = LifecycleClient::new().ok();
    if let Some(lifecycle) = &lifecycle {
        if let Err(err) = lifecycle.report_execution_state(ExecutionState::Running) {
            warn!(%err, "reporting Running failed");
        }
    }

    let mut recovery: Box<dyn RecoveryHandler> =
        match ControlClient::new(None).map(Arc::new).map(RecoveryClient::start) {
            Ok(Ok((client, _thread))) => Box::new(client),
            Ok(Err(err)) => {
                warn!(%err, "recovery forwarder unavailable, recovery escalates to the watchdog");
                Box::new(NoRecovery)
            }
            Err(err) => {
                warn!(%err, "no control channel, recovery escalates to the watchdog");
                Box::new(NoRecovery)
            }
        };

    if config.machine.watchdog_device.is_some() {
        // The device driver is platform integration; the log watchdog
        // records the service/fire decisions either way.
        info!(device = ?config.machine.watchdog_device, "watchdog device configured");
    }
    let mut watchdog = LogWatchdog::new();

    let clock = OsClock;
    let start_ts = match clock.now_ns() {
        0 => u64::MAX,
        now => now,
    };
    cluster.distribute_platform_activation(&mut reader, start_ts);

    info!(cycle_ms = config.machine.cycle.as_millis() as u64, "health monitor ready");

    while !signals.pending() {
        let tick_started = Instant::now();

        // A failed clock accepts everything, see the timestamp discipline.
        let sync_ts = match clock.now_ns() {
            0 => u64::MAX,
            now => now,
        };

        cluster.drain_process_states(&mut reader, sync_ts);
        let report = cluster.tick(sync_ts, &clock, recovery.as_mut());

        if report.recovery_timeout {
            watchdog.fire_reaction();
        } else {
            watchdog.service();
        }

        let elapsed = tick_started.elapsed();
        if elapsed < config.machine.cycle {
            std::thread::sleep(config.machine.cycle - elapsed);
        }
    }

    info!("health monitor stopped");
    0
}
