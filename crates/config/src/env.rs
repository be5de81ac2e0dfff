// SPDX-License-Identifier: Apache-2.0

//! Environment-variable resolution of the configuration directory.

use std::path::PathBuf;

/// Environment variable selecting the configuration directory.
pub const CONFIG_DIR_ENV: &str = "HALE_CONFIG_DIR";

const DEFAULT_CONFIG_DIR: &str = "/etc/hale";

/// Resolve the configuration directory: `HALE_CONFIG_DIR` when set and
/// non-empty, `/etc/hale` otherwise.
pub fn config_dir() -> PathBuf {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_CONFIG_DIR),
    }
}
