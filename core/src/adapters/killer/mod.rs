//! Process termination.
//!
//! Unix delivers SIGTERM or SIGKILL through `nix`. Windows shells out to
//! `taskkill`, escalating to `/F` when a graceful request is refused.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::SignalKiller as ProcessKiller;
#[cfg(windows)]
pub use windows::TaskKiller as ProcessKiller;

use crate::error::{Error, Result};

/// Reject pids that would address a process group or every process.
pub(crate) fn validate_pid(pid: u32) -> Result<()> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: "pid 0 addresses the caller's process group",
        });
    }
    if pid > i32::MAX as u32 {
        return Err(Error::InvalidPid {
            pid,
            reason: "pid is out of range",
        });
    }
    Ok(())
}
