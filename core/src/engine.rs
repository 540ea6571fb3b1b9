//! PortView Engine - the operation surface consumed by the CLI.
//!
//! The engine owns one platform backend, one container runtime and one
//! process killer. Single-shot operations (`scan`, `inspect`, `kill`,
//! `container_action`) are plain async methods; `watch` starts a
//! [`crate::watch`] session sharing the engine through an `Arc`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapters::{DockerCli, NativePlatform, ProcessKiller};
use crate::application::{ContainerEnricher, CorrelationService};
use crate::domain::{ConnectionRecord, RecordFilter, Snapshot};
use crate::error::Result;
use crate::ports::{
    ContainerAction, ContainerOutcome, ContainerRuntime, Platform, ProcessKillerPort, Termination,
};
use crate::watch::{self, WatchConfig, WatchHandle};

/// The main PortView engine.
pub struct PortViewEngine<P = NativePlatform, C = DockerCli, K = ProcessKiller>
where
    P: Platform,
    C: ContainerRuntime,
    K: ProcessKillerPort,
{
    correlation: CorrelationService<P>,
    enricher: ContainerEnricher<C>,
    killer: K,
}

impl PortViewEngine {
    /// Engine over this machine's sockets and the `docker` CLI.
    ///
    /// Fails with `PlatformUnsupported` on targets without a backend.
    pub fn native() -> Result<Self> {
        let platform = NativePlatform::detect()?;
        debug!(platform = platform.name(), "detected platform");
        Ok(Self::new(platform, DockerCli::new(), ProcessKiller::new()))
    }
}

impl<P, C, K> PortViewEngine<P, C, K>
where
    P: Platform,
    C: ContainerRuntime,
    K: ProcessKillerPort,
{
    pub fn new(platform: P, containers: C, killer: K) -> Self {
        Self {
            correlation: CorrelationService::new(platform),
            enricher: ContainerEnricher::new(containers),
            killer,
        }
    }

    /// One complete, ordered snapshot.
    pub async fn scan(&self, include_non_listening: bool, docker_enabled: bool) -> Result<Snapshot> {
        let snapshot = self.correlation.build_snapshot(include_non_listening).await?;
        if !docker_enabled {
            return Ok(snapshot);
        }
        Ok(self.enricher.enrich(&snapshot).await)
    }

    /// Records matching a port number or a name fragment.
    ///
    /// A numeric query looks at every socket state on exactly that port.
    /// Anything else searches listening sockets by process name, command
    /// and container name, image or id.
    pub async fn inspect(&self, query: &str, docker_enabled: bool) -> Result<Vec<ConnectionRecord>> {
        let query = query.trim();
        let numeric = query.parse::<u16>().is_ok();
        let snapshot = self.scan(numeric, docker_enabled).await?;
        let filter = RecordFilter::new().with_target(Some(query));

        Ok(snapshot
            .records()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    /// Terminate one process.
    pub async fn kill(&self, pid: u32, force: bool) -> Result<Termination> {
        let termination = self.killer.terminate(pid, force).await?;
        info!(
            pid = pid,
            signal = termination.signal,
            escalated = termination.escalated,
            "terminated process"
        );
        Ok(termination)
    }

    /// Terminate every process listening on `port`.
    ///
    /// Every owner is attempted, so one refusal does not spare the rest.
    /// Returns one outcome per pid, or an empty list when nothing owns
    /// the port. Only the scan itself can fail the whole call.
    pub async fn kill_port(&self, port: u16, force: bool) -> Result<Vec<(u32, Result<Termination>)>> {
        let snapshot = self.scan(false, false).await?;
        let mut pids: Vec<u32> = snapshot
            .records()
            .iter()
            .filter(|r| r.port() == port)
            .filter_map(|r| r.pid())
            .collect();
        pids.sort_unstable();
        pids.dedup();

        let mut outcomes = Vec::with_capacity(pids.len());
        for pid in pids {
            let outcome = self.kill(pid, force).await;
            if let Err(e) = &outcome {
                warn!(pid = pid, port = port, error = %e, "could not terminate port owner");
            }
            outcomes.push((pid, outcome));
        }
        Ok(outcomes)
    }

    /// Whether a pid is still alive.
    pub fn is_running(&self, pid: u32) -> bool {
        self.killer.is_running(pid)
    }

    /// Stop, restart or read the logs of a container.
    pub async fn container_action(&self, id: &str, action: ContainerAction) -> Result<ContainerOutcome> {
        let runtime = self.enricher.runtime();
        let outcome = match action {
            ContainerAction::Stop => ContainerOutcome::Completed {
                message: runtime.stop(id).await?,
            },
            ContainerAction::Restart => ContainerOutcome::Completed {
                message: runtime.restart(id).await?,
            },
            ContainerAction::FetchLogs(options) => ContainerOutcome::Logs(runtime.logs(id, options).await?),
        };
        debug!(container = id, action = action.verb(), "container action done");
        Ok(outcome)
    }

    /// Start a live session. Frames arrive through the returned handle
    /// until it is cancelled or dropped.
    pub fn watch(self: &Arc<Self>, config: WatchConfig) -> WatchHandle {
        watch::start(Arc::clone(self), config)
    }
}
