//! Error types for the portview-core library.

use thiserror::Error;

/// Result type alias for portview operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while scanning sockets, resolving processes
/// and acting on them.
#[derive(Error, Debug)]
pub enum Error {
    /// The OS refused an operation (enumeration, signal delivery, docker socket).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The process exited between two steps.
    #[error("Process {0} not found")]
    ProcessNotFound(u32),

    /// The container is gone or was never there.
    #[error("Container {0} not found")]
    ContainerNotFound(String),

    /// No socket backend exists for this operating system.
    #[error("Platform not supported: {0}")]
    PlatformUnsupported(String),

    /// The container runtime could not be queried.
    #[error("Container source unavailable: {0}")]
    ContainerSourceUnavailable(String),

    /// The container runtime accepted the request but reported a failure.
    #[error("Container runtime error: {0}")]
    ContainerRuntime(String),

    /// The watch session was cancelled by the user.
    #[error("Cancelled")]
    Cancelled,

    /// The pid cannot be signalled safely.
    #[error("Refusing to signal pid {pid}: {reason}")]
    InvalidPid { pid: u32, reason: &'static str },

    /// A watch session was asked to make an illegal state change.
    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// Failed to execute a system command.
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error degrades output rather than aborting it.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied(_)
                | Error::ProcessNotFound(_)
                | Error::ContainerNotFound(_)
                | Error::ContainerSourceUnavailable(_)
                | Error::Cancelled
        )
    }

    /// Whether the target (process or container) vanished.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ProcessNotFound(_) | Error::ContainerNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_classification() {
        assert!(Error::ContainerSourceUnavailable("docker: not found".into()).is_soft());
        assert!(Error::ProcessNotFound(42).is_soft());
        assert!(Error::Cancelled.is_soft());
        assert!(!Error::PlatformUnsupported("plan9".into()).is_soft());
        assert!(!Error::CommandFailed("lsof".into()).is_soft());
    }

    #[test]
    fn test_not_found_covers_processes_and_containers() {
        assert!(Error::ProcessNotFound(1).is_not_found());
        assert!(Error::ContainerNotFound("web".into()).is_not_found());
        assert!(!Error::PermissionDenied("kill".into()).is_not_found());
    }

    #[test]
    fn test_messages() {
        let err = Error::InvalidPid {
            pid: 0,
            reason: "would signal the whole process group",
        };
        assert_eq!(
            err.to_string(),
            "Refusing to signal pid 0: would signal the whole process group"
        );
    }
}
