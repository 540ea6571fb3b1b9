use tokio::process::Command;
use tracing::{debug, warn};

use super::validate_pid;
use crate::error::{Error, Result};
use crate::ports::{ProcessKillerPort, Termination};

/// Terminates processes with the Windows taskkill utility.
///
/// - `taskkill /PID n`: request graceful termination (sends WM_CLOSE)
/// - `taskkill /PID n /F`: force termination (TerminateProcess)
///
/// Console and service processes have no window to close, so Windows
/// refuses the graceful form for them. `terminate(pid, false)` then
/// escalates to `/F` and reports `escalated: true`.
#[derive(Debug, Default, Clone)]
pub struct TaskKiller;

enum Refusal {
    Error(Error),
    /// Windows would only accept a forced termination.
    NeedsForce(String),
}

impl TaskKiller {
    pub fn new() -> Self {
        Self
    }

    async fn taskkill(&self, pid: u32, force: bool) -> std::result::Result<(), Refusal> {
        debug!(pid = pid, force = force, "executing taskkill");

        let mut cmd = Command::new("taskkill");
        cmd.arg("/PID").arg(pid.to_string());
        if force {
            cmd.arg("/F");
        }

        let output = cmd.output().await.map_err(|e| Refusal::Error(e.into()))?;
        if output.status.success() {
            return Ok(());
        }

        let combined = format!(
            "{} {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        classify(pid, force, combined.trim())
    }
}

fn classify(pid: u32, force: bool, message: &str) -> std::result::Result<(), Refusal> {
    if message.contains("not found") || message.contains("could not be found") {
        return Err(Refusal::Error(Error::ProcessNotFound(pid)));
    }
    if message.contains("Access is denied") || message.contains("access denied") {
        return Err(Refusal::Error(Error::PermissionDenied(format!(
            "taskkill /PID {}: {}",
            pid, message
        ))));
    }
    if message.contains("already been terminated") || message.contains("has exited") {
        return Ok(());
    }
    if !force {
        return Err(Refusal::NeedsForce(message.to_string()));
    }
    Err(Refusal::Error(Error::CommandFailed(format!(
        "taskkill /PID {} /F failed: {}",
        pid, message
    ))))
}

impl ProcessKillerPort for TaskKiller {
    async fn terminate(&self, pid: u32, force: bool) -> Result<Termination> {
        validate_pid(pid)?;

        match self.taskkill(pid, force).await {
            Ok(()) => Ok(Termination {
                pid,
                signal: if force { "taskkill /F" } else { "taskkill" },
                escalated: false,
            }),
            Err(Refusal::Error(e)) => Err(e),
            Err(Refusal::NeedsForce(reason)) => {
                warn!(pid = pid, reason = %reason, "graceful taskkill refused, escalating to /F");
                match self.taskkill(pid, true).await {
                    Ok(()) => Ok(Termination {
                        pid,
                        signal: "taskkill /F",
                        escalated: true,
                    }),
                    Err(Refusal::Error(e)) => Err(e),
                    Err(Refusal::NeedsForce(reason)) => Err(Error::CommandFailed(reason)),
                }
            }
        }
    }

    fn is_running(&self, pid: u32) -> bool {
        std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid), "/NH"])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}
