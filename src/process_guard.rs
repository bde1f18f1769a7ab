//! Lifecycle management for interpreter and git child processes
//!
//! Migration scripts can run for a long time and change the target
//! repository. If the migrator stops (crash, Ctrl+C, SIGTERM) the scripts it
//! started must stop too, otherwise they keep editing a repository whose
//! journal no longer describes it.
//!
//! # Mechanism
//! - Children are spawned in their own process group with a parent-death signal
//! - Every running child is tracked in a process-wide `ChildRegistry`
//! - The first SIGINT/SIGTERM/SIGHUP requests cancellation of the current run
//!   and terminates tracked children (SIGTERM, grace period, SIGKILL)
//! - A second signal exits immediately

use crate::cancellation::Cancellation;
use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Grace period between SIGTERM and SIGKILL when a run is cancelled
pub const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(3);

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Tracks the process groups of running children.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
}

impl ChildRegistry {
    /// Process-wide registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    /// Lock the global registry, recovering from poisoning
    pub fn lock_global() -> MutexGuard<'static, ChildRegistry> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!(pid, "Registered child process");
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!(pid, "Unregistered child process");
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Terminate every tracked child process group.
    ///
    /// Sends SIGTERM, waits up to `grace_period`, then SIGKILLs survivors.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.pids.is_empty() {
            debug!("No child processes to terminate");
            return;
        }

        let pids: Vec<u32> = self.pids.drain().collect();
        info!(count = pids.len(), "Terminating child processes");
        for &pid in &pids {
            terminate_group(pid, grace_period);
        }
    }
}

/// SIGTERM the process group led by `pid`, then SIGKILL it if it is still
/// alive after `grace_period`.
pub fn terminate_group(pid: u32, grace_period: Duration) {
    if let Err(e) = send_signal_to_group(pid, Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM to process group failed, signalling process");
        if let Err(e) = send_signal(pid, Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM failed; process already gone");
            return;
        }
    }

    let start = Instant::now();
    while start.elapsed() < grace_period {
        if !is_process_alive(pid) {
            debug!(pid, "Child process terminated gracefully");
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    warn!(pid, "Process group did not terminate, sending SIGKILL");
    if send_signal_to_group(pid, Signal::SIGKILL).is_err() {
        let _ = send_signal(pid, Signal::SIGKILL);
    }
}

/// Terminate what is left of the process group `pgid` after its leader has
/// exited and been reaped.
///
/// The group exists as long as any member does, so liveness is probed on the
/// group rather than on the leader.
pub fn terminate_stragglers(pgid: u32, grace_period: Duration) {
    if send_signal_to_group(pgid, Signal::SIGTERM).is_err() {
        debug!(pgid, "Process group already empty");
        return;
    }

    let start = Instant::now();
    while start.elapsed() < grace_period {
        if !group_exists(pgid) {
            debug!(pgid, "Leftover processes terminated");
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    warn!(pgid, "Leftover processes did not terminate, sending SIGKILL");
    let _ = send_signal_to_group(pgid, Signal::SIGKILL);
}

fn group_exists(pgid: u32) -> bool {
    signal::kill(Pid::from_raw(-(pgid as i32)), None).is_ok()
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Negative PID addresses the whole group, reaching the interpreter's children
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// True unless the process is gone or a zombie
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/<pid>/stat is the state; Z and X are not running
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// RAII guard that terminates all tracked children when dropped.
///
/// The binary holds one for the duration of `main`.
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
    grace_period: Duration,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
            grace_period: Duration::from_secs(5),
        }
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        debug!("ProcessGuard dropped, terminating remaining children");
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(self.grace_period);
        }
    }
}

/// Install SIGINT, SIGTERM and SIGHUP handlers that cancel `cancellation`.
///
/// The first signal cancels the run and terminates running children; the
/// run then stops and reports a cancellation failure. A second signal exits
/// the process with `128 + signal`.
pub fn init_signal_handlers(cancellation: Cancellation) -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    let received = AtomicBool::new(false);

    std::thread::spawn(move || {
        for sig in signals.forever() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };

            if received.swap(true, Ordering::SeqCst) {
                warn!("Received second {signal_name}, exiting immediately");
                ChildRegistry::lock_global().terminate_all(Duration::ZERO);
                std::process::exit(128 + sig);
            }

            info!("Received {signal_name}, cancelling migration...");
            cancellation.cancel();
            ChildRegistry::lock_global().terminate_all(CANCEL_GRACE_PERIOD);
        }
    });

    Ok(())
}

/// Extension trait for `std::process::Command` to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as leader of a new process group that receives
    /// SIGTERM when the parent dies.
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only calls async-signal-safe functions
        // (setpgid, prctl) between fork and exec.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}
