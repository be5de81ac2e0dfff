// SPDX-License-Identifier: Apache-2.0

//! OS abstraction for process management.
//!
//! [`SystemProcessOps`] is the production backend: fork, apply the
//! configured security/scheduling/rlimit settings in the child, exec with
//! the configured environment and nothing else, and hand the lifecycle
//! sync descriptor over at `SYNC_FD`. [`FakeProcessOps`] is the in-memory
//! backend the engine tests run against.
//!
//! Everything between `fork` and `exec` sticks to raw syscalls: the parent
//! is multi-threaded, so the child must not allocate. All argv/envp
//! pointer arrays are prepared before forking.

use std::collections::HashMap;
use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use hale_core::config::{SchedulingPolicy, StartupConfig};
use hale_core::limits::SYNC_FD;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use parking_lot::RwLock;
use tracing::{debug, warn};

use hale_shm::SyncBlock;

use crate::error::LaunchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartWait {
    /// The process reported `Running` (or does not report at all).
    Running,
    /// No report within the startup timeout.
    Timeout,
}

/// Process management operations the engine depends on.
pub trait ProcessOps: Send + Sync + 'static {
    /// Spawn the process; returns its pid.
    fn start(&self, startup: &StartupConfig) -> Result<i32, LaunchError>;

    /// Wait for the `Running` report of a reporting process. Non-reporting
    /// processes return `Running` immediately.
    fn await_running(&self, pid: i32, startup: &StartupConfig, timeout: Duration) -> StartWait;

    /// Post the termination notice and send the graceful signal.
    fn request_termination(&self, pid: i32);

    fn force_termination(&self, pid: i32);

    /// Block (bounded) until any child exits; `(pid, status)`.
    fn wait_any(&self) -> Option<(i32, i32)>;

    /// Release per-process resources after the exit was processed.
    fn reaped(&self, pid: i32);

    /// The sync mapping of a spawned reporting process (state managers
    /// carry the control channel here).
    fn sync_block(&self, pid: i32) -> Option<Arc<SyncBlock>>;
}

// ---------------------------------------------------------------------------
// Production backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SystemProcessOps {
    blocks: RwLock<HashMap<i32, Arc<SyncBlock>>>,
}

impl SystemProcessOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applied in the child between fork and exec. Syscalls only.
    ///
    /// # Safety
    ///
    /// Must only run in the forked child.
    unsafe fn apply_child_settings(startup: &StartupConfig, gids: &[libc::gid_t]) -> bool {
        for (resource, limit) in [
            (libc::RLIMIT_DATA, startup.rlimits.data),
            (libc::RLIMIT_AS, startup.rlimits.address_space),
            (libc::RLIMIT_STACK, startup.rlimits.stack),
            (libc::RLIMIT_CPU, startup.rlimits.cpu_seconds),
        ] {
            if let Some(value) = limit {
                let rlim = libc::rlimit { rlim_cur: value, rlim_max: value };
                if libc::setrlimit(resource, &rlim) != 0 {
                    return false;
                }
            }
        }

        if startup.cpu_mask != 0 {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            for cpu in 0..64 {
                if startup.cpu_mask & (1 << cpu) != 0 {
                    libc::CPU_SET(cpu, &mut set);
                }
            }
            if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
                return false;
            }
        }

        let policy = match startup.scheduling_policy {
            SchedulingPolicy::Other => libc::SCHED_OTHER,
            SchedulingPolicy::Fifo => libc::SCHED_FIFO,
            SchedulingPolicy::RoundRobin => libc::SCHED_RR,
        };
        let param = libc::sched_param { sched_priority: startup.scheduling_priority };
        if libc::sched_setscheduler(0, policy, &param) != 0 && policy != libc::SCHED_OTHER {
            return false;
        }

        if !gids.is_empty() && libc::setgroups(gids.len(), gids.as_ptr()) != 0 {
            return false;
        }
        if startup.gid != 0 && libc::setgid(startup.gid) != 0 {
            return false;
        }
        if startup.uid != 0 && libc::setuid(startup.uid) != 0 {
            return false;
        }
        true
    }
}

impl ProcessOps for SystemProcessOps {
    fn start(&self, startup: &StartupConfig) -> Result<i32, LaunchError> {
        let executable = startup.executable.display().to_string();
        let spawn_err = |source| LaunchError::Spawn { executable: executable.clone(), source };

        // Everything the child needs, allocated before the fork.
        let path = CString::new(executable.as_str()).map_err(|_| spawn_err(Errno::EINVAL))?;
        let mut argv_owned: Vec<CString> = Vec::with_capacity(startup.args.len() + 1);
        argv_owned.push(path.clone());
        for arg in &startup.args {
            argv_owned.push(CString::new(arg.as_str()).map_err(|_| spawn_err(Errno::EINVAL))?);
        }
        let envp_owned: Vec<CString> = startup
            .env
            .iter()
            .map(|(k, v)| CString::new(format!("{k}={v}")))
            .collect::<Result<_, _>>()
            .map_err(|_| spawn_err(Errno::EINVAL))?;

        let mut argv: Vec<*const libc::c_char> =
            argv_owned.iter().map(|s| s.as_ptr()).collect();
        argv.push(std::ptr::null());
        let mut envp: Vec<*const libc::c_char> =
            envp_owned.iter().map(|s| s.as_ptr()).collect();
        envp.push(std::ptr::null());

        let gids: Vec<libc::gid_t> = startup.supplementary_gids.clone();

        let comms = if startup.comms_type.is_reporting() {
            Some(SyncBlock::create(startup.comms_type).map_err(LaunchError::SyncBlock)?)
        } else {
            None
        };

        // SAFETY: the child only runs syscalls on pre-allocated data until
        // exec or _exit.
        match unsafe { fork() }.map_err(spawn_err)? {
            ForkResult::Child => {
                // SAFETY: child side; raw syscalls only.
                unsafe {
                    if let Some((_, fd)) = &comms {
                        if libc::dup2(fd.as_raw_fd(), SYNC_FD) < 0 {
                            libc::_exit(126);
                        }
                    }
                    if !Self::apply_child_settings(startup, &gids) {
                        libc::_exit(126);
                    }
                    libc::execve(path.as_ptr(), argv.as_ptr(), envp.as_ptr());
                    libc::_exit(127);
                }
            }
            ForkResult::Parent { child } => {
                let pid = child.as_raw();
                if let Some((block, _fd)) = comms {
                    block.sync().set_pid(pid);
                    self.blocks.write().insert(pid, Arc::new(block));
                }
                debug!(pid, executable = %executable, "process spawned");
                Ok(pid)
            }
        }
    }

    fn await_running(&self, pid: i32, startup: &StartupConfig, timeout: Duration) -> StartWait {
        if !startup.comms_type.is_reporting() {
            return StartWait::Running;
        }
        let Some(block) = self.sync_block(pid) else { return StartWait::Timeout };
        match block.sync().wait_running(timeout) {
            Ok(hale_shm::WaitOutcome::Acquired) => StartWait::Running,
            _ => StartWait::Timeout,
        }
    }

    fn request_termination(&self, pid: i32) {
        if let Some(block) = self.sync_block(pid) {
            block.sync().post_terminate_notice();
        }
        if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!(pid, %err, "termination request failed");
        }
    }

    fn force_termination(&self, pid: i32) {
        if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGKILL) {
            warn!(pid, %err, "force termination failed");
        }
    }

    fn wait_any(&self) -> Option<(i32, i32)> {
        loop {
            match waitpid(Pid::from_raw(-1), None) {
                Ok(WaitStatus::Exited(pid, code)) => return Some((pid.as_raw(), code)),
                Ok(WaitStatus::Signaled(pid, signal, _)) => {
                    return Some((pid.as_raw(), 128 + signal as i32))
                }
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(_) => {
                    // No children right now.
                    std::thread::sleep(Duration::from_millis(50));
                    return None;
                }
            }
        }
    }

    fn reaped(&self, pid: i32) {
        self.blocks.write().remove(&pid);
    }

    fn sync_block(&self, pid: i32) -> Option<Arc<SyncBlock>> {
        self.blocks.read().get(&pid).cloned()
    }
}

// ---------------------------------------------------------------------------
// In-memory backend for tests
// ---------------------------------------------------------------------------

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeProcessOps;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::{Condvar, Mutex};
    use std::collections::{HashSet, VecDeque};

    #[derive(Default)]
    struct FakeState {
        next_pid: i32,
        alive: HashMap<i32, String>,
        exits: VecDeque<(i32, i32)>,
        spawn_order: Vec<String>,
    }

    /// Scripted process backend: processes "run" as bookkeeping entries and
    /// exit when told to.
    pub struct FakeProcessOps {
        state: Mutex<FakeState>,
        exit_ready: Condvar,
        /// Processes that never report `Running` (startup-timeout tests).
        never_running: Mutex<HashSet<String>>,
        /// Processes whose spawn fails outright.
        fail_spawn: Mutex<HashSet<String>>,
        /// Processes that ignore the graceful termination request.
        ignore_sigterm: Mutex<HashSet<String>>,
    }

    impl Default for FakeProcessOps {
        fn default() -> Self {
            Self {
                state: Mutex::new(FakeState { next_pid: 100, ..Default::default() }),
                exit_ready: Condvar::new(),
                never_running: Default::default(),
                fail_spawn: Default::default(),
                ignore_sigterm: Default::default(),
            }
        }
    }

    impl FakeProcessOps {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_never_running(&self, short_name: &str) {
            self.never_running.lock().insert(short_name.to_string());
        }

        pub fn set_fail_spawn(&self, short_name: &str) {
            self.fail_spawn.lock().insert(short_name.to_string());
        }

        pub fn set_ignore_sigterm(&self, short_name: &str) {
            self.ignore_sigterm.lock().insert(short_name.to_string());
        }

        /// Names in spawn order, for ordering assertions.
        pub fn spawn_order(&self) -> Vec<String> {
            self.state.lock().spawn_order.clone()
        }

        pub fn alive(&self) -> Vec<String> {
            self.state.lock().alive.values().cloned().collect()
        }

        pub fn pid_of(&self, short_name: &str) -> Option<i32> {
            self.state
                .lock()
                .alive
                .iter()
                .find(|(_, name)| name.as_str() == short_name)
                .map(|(&pid, _)| pid)
        }

        /// Simulate a crash: the process exits without a request.
        pub fn crash(&self, pid: i32, status: i32) {
            let mut state = self.state.lock();
            if state.alive.remove(&pid).is_some() {
                state.exits.push_back((pid, status));
                self.exit_ready.notify_all();
            }
        }
    }

    impl ProcessOps for FakeProcessOps {
        fn start(&self, startup: &StartupConfig) -> Result<i32, LaunchError> {
            let name = startup.short_name.to_string();
            if self.fail_spawn.lock().contains(&name) {
                return Err(LaunchError::Spawn {
                    executable: startup.executable.display().to_string(),
                    source: Errno::ENOENT,
                });
            }
            let mut state = self.state.lock();
            state.next_pid += 1;
            let pid = state.next_pid;
            state.alive.insert(pid, name.clone());
            state.spawn_order.push(name);
            Ok(pid)
        }

        fn await_running(&self, _pid: i32, startup: &StartupConfig, timeout: Duration) -> StartWait {
            if !startup.comms_type.is_reporting() {
                return StartWait::Running;
            }
            if self.never_running.lock().contains(startup.short_name.as_str()) {
                std::thread::sleep(timeout);
                return StartWait::Timeout;
            }
            StartWait::Running
        }

        fn request_termination(&self, pid: i32) {
            let mut state = self.state.lock();
            let Some(name) = state.alive.get(&pid).cloned() else { return };
            if self.ignore_sigterm.lock().contains(&name) {
                return;
            }
            state.alive.remove(&pid);
            state.exits.push_back((pid, 0));
            self.exit_ready.notify_all();
        }

        fn force_termination(&self, pid: i32) {
            let mut state = self.state.lock();
            if state.alive.remove(&pid).is_some() {
                state.exits.push_back((pid, 137));
                self.exit_ready.notify_all();
            }
        }

        fn wait_any(&self) -> Option<(i32, i32)> {
            let mut state = self.state.lock();
            if state.exits.is_empty() {
                self.exit_ready.wait_for(&mut state, Duration::from_millis(50));
            }
            state.exits.pop_front()
        }

        fn reaped(&self, _pid: i32) {}

        fn sync_block(&self, _pid: i32) -> Option<Arc<SyncBlock>> {
            None
        }
    }
}
