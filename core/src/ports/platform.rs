//! Platform introspection port (interface).

use crate::domain::{CorrelationKey, Resolution, SocketEntry};
use crate::error::Result;

/// Per-OS socket enumeration and process resolution.
///
/// Exactly one implementation is compiled for each target; see
/// `adapters::platform::NativePlatform`.
pub trait Platform: Send + Sync + 'static {
    /// Resolver state built once per scan pass.
    type Pass: ResolvePass;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Enumerate TCP and UDP sockets of both address families.
    ///
    /// Fails with `PermissionDenied` only when the OS refuses enumeration
    /// outright; partially readable entries are returned best-effort.
    fn enumerate_sockets(
        &self,
        include_non_listening: bool,
    ) -> impl std::future::Future<Output = Result<Vec<SocketEntry>>> + Send;

    /// Snapshot the process table once for the following resolutions.
    fn begin_pass(&self) -> impl std::future::Future<Output = Self::Pass> + Send;
}

/// Resolves correlation keys against one process-table snapshot.
pub trait ResolvePass: Send {
    /// Resolve one key. Called at most once per distinct key per pass.
    fn resolve(&mut self, key: &CorrelationKey) -> Resolution;
}
