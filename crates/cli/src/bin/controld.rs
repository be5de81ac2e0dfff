// SPDX-License-Identifier: Apache-2.0

//! hale-controld: the control daemon.
//!
//! A state-manager process spawned by the Launch Manager. It owns the
//! control shm socket the CLI writes into and forwards each command
//! through the control-client channel.

use std::time::Duration;

use anyhow::{Context, Result};
use hale_client::{ControlClient, ExecutionState, LifecycleClient};
use hale_core::limits::{CONTROL_SOCKET_CAPACITY, CONTROL_SOCKET_SHM_NAME};
use hale_core::wire::SetStateCommand;
use hale_core::IdentifierHash;
use hale_shm::ShmSocket;
use tracing::{error, info, warn};

const POLL_DELAY: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::new(
                std::env::var("HALE_LOG").unwrap_or_else(|_| "info".to_string()),
            ),
        )
        .init();

    let lifecycle = LifecycleClient::new().context("not spawned by the launch manager")?;
    lifecycle.report_execution_state(ExecutionState::Running).context("reporting Running")?;

    let control = ControlClient::new(Some(Box::new(|event| {
        error!(
            group = %event.group,
            execution_error = event.execution_error,
            on_enter = event.on_enter,
            "process group entered an undefined state"
        );
    })))
    .context("control channel unavailable")?;

    let socket: ShmSocket<SetStateCommand> =
        ShmSocket::create(CONTROL_SOCKET_SHM_NAME, CONTROL_SOCKET_CAPACITY, 0o666)
            .context("creating the control socket")?;

    info!("control daemon ready");

    loop {
        while let Some(command) = socket.try_receive() {
            let path = command.path().to_string();
            let Some(split) = path.rfind('/').filter(|&i| i > 0) else {
                warn!(path, "malformed state path ignored");
                continue;
            };
            let group = IdentifierHash::of(&path[..split]);
            let state = IdentifierHash::of(&path);

            match control.set_state(group, state) {
                Ok(outcome) => info!(path, ?outcome, "set-state request finished"),
                Err(err) => warn!(path, %err, "set-state request failed"),
            }
        }

        // Between commands, surface asynchronous launch-manager events.
        let _ = control.poll_event();

        if lifecycle.termination_requested() {
            info!("termination requested, shutting down");
            return Ok(());
        }
        std::thread::sleep(POLL_DELAY);
    }
}
