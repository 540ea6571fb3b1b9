use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use super::validate_pid;
use crate::error::{Error, Result};
use crate::ports::{ProcessKillerPort, Termination};

/// Signals processes directly.
///
/// - SIGTERM (15): graceful termination request
/// - SIGKILL (9): immediate forced termination
#[derive(Debug, Default, Clone)]
pub struct SignalKiller;

impl SignalKiller {
    pub fn new() -> Self {
        Self
    }

    fn send(pid: u32, sig: Signal) -> Result<()> {
        validate_pid(pid)?;
        debug!(pid = pid, signal = %sig, "sending signal");

        match signal::kill(Pid::from_raw(pid as i32), sig) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(Error::ProcessNotFound(pid)),
            Err(Errno::EPERM) => {
                warn!(pid = pid, "permission denied to signal process");
                Err(Error::PermissionDenied(format!("cannot signal pid {}", pid)))
            }
            Err(e) => Err(Error::CommandFailed(format!("kill({}, {}): {}", pid, sig, e))),
        }
    }
}

impl ProcessKillerPort for SignalKiller {
    async fn terminate(&self, pid: u32, force: bool) -> Result<Termination> {
        let sig = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        Self::send(pid, sig)?;

        Ok(Termination {
            pid,
            signal: sig.as_str(),
            escalated: false,
        })
    }

    fn is_running(&self, pid: u32) -> bool {
        if validate_pid(pid).is_err() {
            return false;
        }
        // EPERM still proves the process exists
        matches!(
            signal::kill(Pid::from_raw(pid as i32), None),
            Ok(()) | Err(Errno::EPERM)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[tokio::test]
    async fn test_terminate_missing_pid_is_not_found() {
        // Spawn and reap a child so its pid is known to be free
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let killer = SignalKiller::new();
        let err = killer.terminate(pid, false).await.unwrap_err();
        assert!(matches!(err, Error::ProcessNotFound(p) if p == pid));
        assert!(!killer.is_running(pid));
    }

    #[tokio::test]
    async fn test_terminate_running_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let killer = SignalKiller::new();
        assert!(killer.is_running(pid));

        let done = killer.terminate(pid, true).await.unwrap();
        assert_eq!(done.signal, "SIGKILL");
        assert!(!done.escalated);
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn test_refuses_pid_zero() {
        let err = SignalKiller::new().terminate(0, true).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPid { pid: 0, .. }));
    }
}
