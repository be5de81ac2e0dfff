// SPDX-License-Identifier: Apache-2.0

//! hale: the lifecycle CLI.
//!
//! Sends one set-state command through the control shm socket to the
//! control daemon, which forwards it to the Launch Manager. Exits non-zero
//! on failure; no retries.

use anyhow::{bail, Context, Result};
use clap::Parser;

use hale_core::limits::CONTROL_SOCKET_SHM_NAME;
use hale_core::wire::SetStateCommand;
use hale_shm::ShmSocket;

/// Command a process group into a state.
#[derive(Parser)]
#[command(name = "hale", about = "Send a process-group state change request")]
struct Args {
    /// Target state path, e.g. /Machine/Startup
    path: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if !args.path.starts_with('/') || args.path.matches('/').count() < 2 {
        bail!("expected a /Group/State path, got `{}`", args.path);
    }

    let socket: ShmSocket<SetStateCommand> = ShmSocket::connect(CONTROL_SOCKET_SHM_NAME)
        .context("control daemon is not running (control socket unavailable)")?;

    if !socket.try_send(SetStateCommand::new(&args.path)) {
        bail!("control socket is full; request not sent");
    }

    println!("request sent: {}", args.path);
    Ok(())
}
