// SPDX-License-Identifier: Apache-2.0

//! Shutdown signal handling via signalfd.
//!
//! SIGTERM/SIGINT are blocked process-wide and read from a non-blocking
//! signalfd polled by the main loop. Install before spawning any thread so
//! the mask is inherited everywhere.

use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use tracing::info;

pub struct ShutdownSignal {
    fd: SignalFd,
    received: bool,
}

impl ShutdownSignal {
    pub fn install() -> Result<Self, nix::Error> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGTERM);
        mask.add(Signal::SIGINT);
        mask.thread_block()?;
        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)?;
        Ok(Self { fd, received: false })
    }

    /// Whether a shutdown signal has arrived. Sticky.
    pub fn pending(&mut self) -> bool {
        if self.received {
            return true;
        }
        if let Ok(Some(siginfo)) = self.fd.read_signal() {
            info!(signal = siginfo.ssi_signo, "shutdown signal received");
            self.received = true;
        }
        self.received
    }
}
