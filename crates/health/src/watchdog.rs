// SPDX-License-Identifier: Apache-2.0

//! Watchdog interface serviced by the daemon tick.
//!
//! The device driver itself is platform integration; the engine only needs
//! the service/fire decision. The log-only implementation is used when no
//! watchdog device is configured.

use tracing::{error, trace};

pub trait Watchdog: Send {
    /// Everything healthy this tick.
    fn service(&mut self);

    /// A recovery notification timed out or a supervision stopped without
    /// resolution: trigger the configured reaction.
    fn fire_reaction(&mut self);
}

/// Watchdog that only logs; used when no device is configured.
#[derive(Default)]
pub struct LogWatchdog {
    fired: bool,
}

impl LogWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

impl Watchdog for LogWatchdog {
    fn service(&mut self) {
        trace!("watchdog serviced");
    }

    fn fire_reaction(&mut self) {
        if !self.fired {
            error!("watchdog reaction fired");
        }
        self.fired = true;
    }
}
