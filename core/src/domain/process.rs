//! Process metadata resolved for a socket owner.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Descriptive metadata about a process.
///
/// Only `pid` is guaranteed. Every other field is `None` when the
/// platform could not (or was not allowed to) read it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Short executable name.
    pub name: Option<String>,
    /// Full command line.
    pub command: Option<String>,
    /// Owning user name (or numeric uid when no name is known).
    pub user: Option<String>,
    pub start_time: Option<SystemTime>,
    /// Resident set size in bytes.
    pub memory_bytes: Option<u64>,
    /// Cumulative user + system CPU time.
    pub cpu_time: Option<Duration>,
    /// Number of live direct children.
    pub children: Option<u32>,
}

impl ProcessInfo {
    /// A process about which only the pid is known.
    pub fn unknown(pid: u32) -> Self {
        Self {
            pid,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Time elapsed since the process started, measured at `now`.
    pub fn uptime_at(&self, now: SystemTime) -> Option<Duration> {
        self.start_time.and_then(|start| now.duration_since(start).ok())
    }
}

/// Outcome of resolving one correlation key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ProcessInfo),
    /// Some fields could not be read; the partial info is kept.
    PermissionDenied(ProcessInfo),
    /// The owner exited, or the key maps to no visible process.
    NotFound,
}

impl Resolution {
    /// The process info, complete or partial.
    pub fn into_process(self) -> Option<ProcessInfo> {
        match self {
            Resolution::Resolved(info) | Resolution::PermissionDenied(info) => Some(info),
            Resolution::NotFound => None,
        }
    }
}
