// SPDX-License-Identifier: Apache-2.0

//! hale-lmd: the Launch Manager daemon.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hale_core::limits::{HANDLER_POLL_DELAY, WORKER_THREADS};
use hale_daemon::{startup, ShutdownSignal};
use hale_launch::graph::GraphState;
use hale_launch::{ControlHandler, Engine, ProcessStateNotifier, SystemProcessOps};
use hale_shm::HandlerNudge;
use tracing::{error, info, warn};

/// Bounded drain of the off transitions at shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let mut signals = match ShutdownSignal::install() {
        Ok(signals) => signals,
        Err(err) => {
            eprintln!("hale-lmd: installing signal handling failed: {err}");
            return 1;
        }
    };

    let _guard = match startup("lmd") {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("hale-lmd: {err}");
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

    let notifier = match ProcessStateNotifier::create() {
        Ok(notifier) => notifier,
        Err(err) => {
            error!(%err, "creating the process-state ring failed");
            return 1;
        }
    };

    let nudge = match HandlerNudge::create() {
        Ok(nudge) => Arc::new(nudge),
        Err(err) => {
            error!(%err, "creating the handler nudge failed");
            return 1;
        }
    };

    let engine = match Engine::new(
        config.groups.clone(),
        SystemProcessOps::new(),
        Some(notifier),
        Arc::clone(&nudge) as Arc<dyn hale_launch::Nudge>,
    ) {
        Ok(engine) => engine,
        Err(err) => {
            error!(%err, "building the process-group manager failed");
            return 1;
        }
    };

    let workers = match engine.spawn_workers(WORKER_THREADS) {
        Ok(workers) => workers,
        Err(err) => {
            error!(%err, "spawning workers failed");
            return 1;
        }
    };
    let reaper = match engine.spawn_reaper() {
        Ok(reaper) => reaper,
        Err(err) => {
            error!(%err, "spawning the reaper failed");
            return 1;
        }
    };

    // Initial machine-state transition, when configured.
    if let (Some(group), Some(state)) = (config.machine.machine_group, config.machine.initial_state)
    {
        let outcome = engine.start_initial_transition(group, state);
        info!(?outcome, group = %group, state = %state, "initial machine state requested");
    }

    info!(groups = config.groups.len(), "launch manager ready");

    let mut handler = ControlHandler::new(Arc::clone(&engine));
    while !signals.pending() {
        let _ = nudge.wait_timeout(HANDLER_POLL_DELAY);
        handler.scan();
    }

    // Shutdown: everything to its off state, then drain.
    info!("driving process groups to their off states");
    engine.start_off_transitions();
    let deadline = Instant::now() + SHUTDOWN_DRAIN;
    while Instant::now() < deadline {
        handler.scan();
        let settled = engine
            .graphs()
            .iter()
            .all(|g| matches!(g.state(), GraphState::Success | GraphState::Undefined));
        if settled {
            break;
        }
        std::thread::sleep(HANDLER_POLL_DELAY);
    }

    engine.shutdown();
    for worker in workers {
        let _ = worker.join();
    }
    if reaper.join().is_err() {
        warn!("reaper thread panicked");
    }
    info!("launch manager stopped");
    0
}
