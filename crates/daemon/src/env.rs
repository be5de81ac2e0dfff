// SPDX-License-Identifier: Apache-2.0

//! Centralized environment variable access for the daemons.

use std::path::PathBuf;

/// Resolve the runtime state directory: `HALE_STATE_DIR` > `/run/hale`.
pub fn state_dir() -> PathBuf {
    match std::env::var("HALE_STATE_DIR") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from("/run/hale"),
    }
}

/// Log directory: `HALE_LOG_DIR` > the state directory.
pub fn log_dir() -> PathBuf {
    match std::env::var("HALE_LOG_DIR") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => state_dir(),
    }
}

/// Log filter: `HALE_LOG` > `info`.
pub fn log_filter() -> String {
    std::env::var("HALE_LOG").unwrap_or_else(|_| "info".to_string())
}
