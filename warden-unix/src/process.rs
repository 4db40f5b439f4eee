//! Process signalling helpers used to supervise workers.

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::{Pid, getppid};

/// PID of the process that spawned us.
pub fn parent_pid() -> u32 {
    getppid().as_raw() as u32
}

/// PID of the current process.
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Forcibly terminate a process with `SIGKILL`.
///
/// A process that no longer exists counts as terminated.
pub fn force_kill(pid: u32) -> std::io::Result<()> {
    send_signal(pid, Signal::SIGKILL)
}

/// Send `signal` to `pid`. `ESRCH` (no such process) is not an error.
///
/// Fails with `EINVAL` for 0 and for values that do not fit a positive
/// `pid_t`, which `kill` would treat as process groups.
pub fn send_signal(pid: u32, signal: Signal) -> std::io::Result<()> {
    match kill(single_process(pid)?, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Check whether a process exists by sending signal 0.
///
/// Zombies still count as existing until they are reaped.
pub fn process_exists(pid: u32) -> bool {
    single_process(pid).is_ok_and(|pid| kill(pid, None).is_ok())
}

fn single_process(pid: u32) -> Result<Pid, Errno> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
        _ => Err(Errno::EINVAL),
    }
}
