// SPDX-License-Identifier: Apache-2.0

//! Daemon startup: exclusive lock file, pid file, logging.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use fs2::FileExt;
use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use crate::env;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("creating state directory {dir}: {source}")]
    StateDir { dir: String, source: std::io::Error },

    #[error("another instance is already running (lock {path} is held)")]
    AlreadyRunning { path: String },

    #[error("lock file {path}: {source}")]
    LockFile { path: String, source: std::io::Error },

    #[error("log file: {0}")]
    LogFile(std::io::Error),
}

/// Held for the daemon lifetime: the exclusive lock plus the logging
/// worker.
pub struct DaemonGuard {
    // NOTE(lifetime): held to keep the exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    #[allow(dead_code)]
    log_guard: WorkerGuard,
    pub state_dir: PathBuf,
}

/// Acquire single-instance ownership and initialize logging for `name`
/// (`lmd` or `hmd`).
pub fn startup(name: &str) -> Result<DaemonGuard, LifecycleError> {
    let state_dir = env::state_dir();
    std::fs::create_dir_all(&state_dir).map_err(|source| LifecycleError::StateDir {
        dir: state_dir.display().to_string(),
        source,
    })?;

    let lock_path = state_dir.join(format!("{name}.pid"));
    let mut lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|source| LifecycleError::LockFile {
            path: lock_path.display().to_string(),
            source,
        })?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| LifecycleError::AlreadyRunning { path: lock_path.display().to_string() })?;
    let _ = lock_file.set_len(0);
    let _ = writeln!(lock_file, "{}", std::process::id());

    let appender = tracing_appender::rolling::never(env::log_dir(), format!("{name}.log"));
    let (writer, log_guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(env::log_filter()))
        .with_writer(writer)
        .with_ansi(false)
        .try_init();

    info!(daemon = name, pid = std::process::id(), "daemon starting");
    Ok(DaemonGuard { lock_file, log_guard, state_dir })
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
