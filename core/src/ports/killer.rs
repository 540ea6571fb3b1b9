//! Process killer port (interface).

use serde::Serialize;

use crate::error::Result;

/// What a successful termination request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Termination {
    pub pid: u32,
    /// Name of the signal or mechanism used (`SIGTERM`, `taskkill /F`, ...).
    pub signal: &'static str,
    /// Whether a graceful request was upgraded to a forced one.
    pub escalated: bool,
}

/// Port for killing processes.
///
/// This trait defines the interface for process termination.
/// Implementations handle platform-specific signal handling.
pub trait ProcessKillerPort: Send + Sync + 'static {
    /// Request termination of a process.
    ///
    /// If `force` is false a cooperative shutdown is requested. Platforms
    /// that cannot deliver one escalate and report `escalated: true`.
    ///
    /// Fails with `ProcessNotFound` if the pid does not exist and with
    /// `PermissionDenied` if the caller may not signal it.
    fn terminate(
        &self,
        pid: u32,
        force: bool,
    ) -> impl std::future::Future<Output = Result<Termination>> + Send;

    /// Check if a process is still running.
    fn is_running(&self, pid: u32) -> bool;
}
