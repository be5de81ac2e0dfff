// SPDX-License-Identifier: Apache-2.0

//! Machine-level settings file.

use std::path::PathBuf;
use std::time::Duration;

use hale_core::{IdentifierHash, MachineConfig};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMachine {
    /// Health Monitor tick period in milliseconds.
    #[serde(default = "default_cycle_ms")]
    cycle_ms: u64,
    watchdog_device: Option<PathBuf>,
    #[serde(default = "default_supervision_buffer")]
    supervision_buffer_size: u16,
    #[serde(default = "default_checkpoint_ring")]
    checkpoint_ring_capacity: u16,
    /// Path of the machine process group, e.g. `/Machine`.
    machine_group: Option<String>,
    /// Path of its initial state, e.g. `/Machine/Startup`.
    initial_state: Option<String>,
}

fn default_cycle_ms() -> u64 {
    10
}

fn default_supervision_buffer() -> u16 {
    64
}

fn default_checkpoint_ring() -> u16 {
    hale_core::limits::CHECKPOINT_RING_CAPACITY
}

/// Parse the machine settings from TOML text.
pub fn load_machine_str(raw: &str) -> Result<MachineConfig, toml::de::Error> {
    let raw: RawMachine = toml::from_str(raw)?;
    Ok(MachineConfig {
        cycle: Duration::from_millis(raw.cycle_ms),
        watchdog_device: raw.watchdog_device,
        supervision_buffer_size: raw.supervision_buffer_size,
        checkpoint_ring_capacity: raw.checkpoint_ring_capacity,
        machine_group: raw.machine_group.as_deref().map(IdentifierHash::of),
        initial_state: raw.initial_state.as_deref().map(IdentifierHash::of),
    })
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
