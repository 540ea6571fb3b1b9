//! In-memory port implementations shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::domain::{
    ContainerInfo, CorrelationKey, PortMapping, ProcessInfo, Protocol, Resolution, SocketEntry,
    TcpState, Transport,
};
use crate::error::{Error, Result};
use crate::ports::{
    ContainerRuntime, LogOptions, LogStream, Platform, ProcessKillerPort, ResolvePass, Termination,
};

#[derive(Default)]
struct PlatformState {
    sockets: Vec<SocketEntry>,
    owners: HashMap<CorrelationKey, Resolution>,
    fail_with: Option<String>,
    delay: Duration,
}

/// Scriptable platform. Clones share state, so a test can keep a handle
/// and change the system between refreshes.
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<PlatformState>>,
    resolves: Arc<AtomicUsize>,
    scans: Arc<AtomicUsize>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_socket(self, socket: SocketEntry) -> Self {
        self.state.lock().sockets.push(socket);
        self
    }

    pub fn with_owner(self, key: CorrelationKey, resolution: Resolution) -> Self {
        self.state.lock().owners.insert(key, resolution);
        self
    }

    pub fn set_sockets(&self, sockets: Vec<SocketEntry>) {
        self.state.lock().sockets = sockets;
    }

    pub fn set_failure(&self, reason: Option<&str>) {
        self.state.lock().fail_with = reason.map(str::to_string);
    }

    /// Make every enumeration take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = delay;
    }

    pub fn resolve_count(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

pub struct FakePass {
    owners: HashMap<CorrelationKey, Resolution>,
    resolves: Arc<AtomicUsize>,
}

impl ResolvePass for FakePass {
    fn resolve(&mut self, key: &CorrelationKey) -> Resolution {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        self.owners.get(key).cloned().unwrap_or(Resolution::NotFound)
    }
}

impl Platform for FakePlatform {
    type Pass = FakePass;

    fn name(&self) -> &'static str {
        "fake"
    }

    async fn enumerate_sockets(&self, include_non_listening: bool) -> Result<Vec<SocketEntry>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.lock().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        if let Some(reason) = &state.fail_with {
            return Err(Error::PermissionDenied(reason.clone()));
        }
        Ok(state
            .sockets
            .iter()
            .filter(|s| include_non_listening || s.is_listening())
            .cloned()
            .collect())
    }

    async fn begin_pass(&self) -> FakePass {
        FakePass {
            owners: self.state.lock().owners.clone(),
            resolves: Arc::clone(&self.resolves),
        }
    }
}

/// Container runtime with a fixed listing and recorded actions.
#[derive(Clone)]
pub struct FakeContainers {
    listing: Arc<Mutex<std::result::Result<Vec<ContainerInfo>, String>>>,
    pub actions: Arc<Mutex<Vec<String>>>,
    log_lines: Vec<String>,
}

impl FakeContainers {
    pub fn new(containers: Vec<ContainerInfo>) -> Self {
        Self {
            listing: Arc::new(Mutex::new(Ok(containers))),
            actions: Arc::new(Mutex::new(Vec::new())),
            log_lines: Vec::new(),
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        let fake = Self::new(Vec::new());
        *fake.listing.lock() = Err(reason.to_string());
        fake
    }

    pub fn with_logs(mut self, lines: &[&str]) -> Self {
        self.log_lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    fn known(&self, id: &str) -> bool {
        match &*self.listing.lock() {
            Ok(list) => list.iter().any(|c| c.id == id || c.name == id),
            Err(_) => false,
        }
    }
}

impl ContainerRuntime for FakeContainers {
    async fn list_running(&self) -> Result<Vec<ContainerInfo>> {
        self.listing
            .lock()
            .clone()
            .map_err(Error::ContainerSourceUnavailable)
    }

    async fn stop(&self, id: &str) -> Result<String> {
        if !self.known(id) {
            return Err(Error::ContainerNotFound(id.to_string()));
        }
        self.actions.lock().push(format!("stop {}", id));
        Ok(format!("Stopped {}", id))
    }

    async fn restart(&self, id: &str) -> Result<String> {
        if !self.known(id) {
            return Err(Error::ContainerNotFound(id.to_string()));
        }
        self.actions.lock().push(format!("restart {}", id));
        Ok(format!("Restarted {}", id))
    }

    async fn logs(&self, id: &str, options: LogOptions) -> Result<LogStream> {
        if !self.known(id) {
            return Err(Error::ContainerNotFound(id.to_string()));
        }
        self.actions.lock().push(format!("logs {}", id));
        let skip = options
            .tail
            .map_or(0, |tail| self.log_lines.len().saturating_sub(tail));
        Ok(LogStream::from_lines(self.log_lines.iter().skip(skip).cloned()))
    }
}

/// Killer over a set of "live" pids.
#[derive(Clone, Default)]
pub struct FakeKiller {
    alive: Arc<Mutex<HashSet<u32>>>,
    protected: Arc<Mutex<HashSet<u32>>>,
    delay: Duration,
}

impl FakeKiller {
    pub fn with_pids(pids: &[u32]) -> Self {
        let killer = Self::default();
        killer.alive.lock().extend(pids.iter().copied());
        killer
    }

    /// Pids that exist but may not be signalled.
    pub fn protect(self, pid: u32) -> Self {
        self.alive.lock().insert(pid);
        self.protected.lock().insert(pid);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl ProcessKillerPort for FakeKiller {
    async fn terminate(&self, pid: u32, force: bool) -> Result<Termination> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.protected.lock().contains(&pid) {
            return Err(Error::PermissionDenied(format!("cannot signal pid {}", pid)));
        }
        if !self.alive.lock().remove(&pid) {
            return Err(Error::ProcessNotFound(pid));
        }
        Ok(Termination {
            pid,
            signal: if force { "SIGKILL" } else { "SIGTERM" },
            escalated: false,
        })
    }

    fn is_running(&self, pid: u32) -> bool {
        self.alive.lock().contains(&pid)
    }
}

pub fn tcp_listen(port: u16, key: CorrelationKey) -> SocketEntry {
    SocketEntry::new(
        Protocol::TCP,
        IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        port,
        Some(TcpState::Listen),
        key,
    )
}

pub fn process(pid: u32, name: &str, user: &str) -> ProcessInfo {
    ProcessInfo {
        start_time: Some(SystemTime::now() - Duration::from_secs(60)),
        memory_bytes: Some(1 << 20),
        ..ProcessInfo::unknown(pid)
            .with_name(name)
            .with_command(format!("{} --serve", name))
            .with_user(user)
    }
}

/// node on 3000 (inode 55) and postgres on 5432 (inode 9).
pub fn two_listeners() -> FakePlatform {
    FakePlatform::new()
        .with_socket(tcp_listen(3000, CorrelationKey::Inode(55)))
        .with_socket(tcp_listen(5432, CorrelationKey::Inode(9)))
        .with_owner(
            CorrelationKey::Inode(55),
            Resolution::Resolved(process(48291, "node", "mark")),
        )
        .with_owner(
            CorrelationKey::Inode(9),
            Resolution::Resolved(process(1203, "postgres", "pg")),
        )
}

pub fn web_container(host_port: u16) -> ContainerInfo {
    ContainerInfo::new("f00dbabe1234567890", "web", "nginx:latest")
        .with_port(PortMapping::new(host_port, 80, Transport::Tcp))
}
