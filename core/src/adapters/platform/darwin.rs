//! macOS backend using lsof and ps.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use nix::unistd::{Uid, User};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::{CorrelationKey, Family, ProcessInfo, Protocol, Resolution, SocketEntry, TcpState, Transport};
use crate::error::{Error, Result};
use crate::ports::{Platform, ResolvePass};

use super::utils::Utils;

/// macOS-specific platform using lsof for sockets and ps for processes.
#[derive(Debug, Default, Clone)]
pub struct DarwinPlatform;

impl DarwinPlatform {
    /// Create a new macOS backend.
    pub fn new() -> Self {
        Self
    }

    pub fn detect() -> Result<Self> {
        Ok(Self::new())
    }

    async fn run_ps(args: &[&str]) -> Option<String> {
        let output = Command::new("/bin/ps")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
            Err(e) => {
                warn!(error = %e, "failed to run ps");
                None
            }
        }
    }
}

impl Platform for DarwinPlatform {
    type Pass = DarwinPass;

    fn name(&self) -> &'static str {
        "macos-lsof"
    }

    async fn enumerate_sockets(&self, include_non_listening: bool) -> Result<Vec<SocketEntry>> {
        let output = Command::new("/usr/sbin/lsof")
            .args(["-iTCP", "-iUDP", "-P", "-n", "+c", "0"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::CommandFailed(format!("Failed to run lsof: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("Operation not permitted") && output.stdout.is_empty() {
            return Err(Error::PermissionDenied(format!("lsof: {}", stderr.trim())));
        }

        // lsof exits 1 when nothing matched, which is not an error here
        let stdout = String::from_utf8_lossy(&output.stdout);
        let entries: Vec<SocketEntry> = parse_lsof_output(&stdout)
            .into_iter()
            .filter(|e| include_non_listening || e.is_listening())
            .collect();

        debug!(sockets = entries.len(), "enumerated lsof sockets");
        Ok(entries)
    }

    async fn begin_pass(&self) -> DarwinPass {
        let table = Self::run_ps(&["-axww", "-o", "pid=,ppid=,uid=,rss=,time=,etime=,comm="]).await;
        let commands = Self::run_ps(&["-axww", "-o", "pid=,args="]).await;

        DarwinPass::new(
            table.as_deref().map(parse_ps_table).unwrap_or_default(),
            commands.as_deref().map(parse_ps_commands).unwrap_or_default(),
            SystemTime::now(),
        )
    }
}

/// Parse lsof output into socket entries.
///
/// ```text
/// COMMAND    PID  USER   FD   TYPE             DEVICE SIZE/OFF NODE NAME
/// node     34805  code   19u  IPv6 0x3d8015e195af1f3f      0t0  TCP [::1]:3000 (LISTEN)
/// ```
fn parse_lsof_output(output: &str) -> Vec<SocketEntry> {
    let mut entries = Vec::new();
    let mut seen: HashSet<(Protocol, u16, IpAddr, u32)> = HashSet::new();

    for line in output.lines().skip(1) {
        let components: Vec<&str> = line.split_whitespace().collect();
        if components.len() < 9 {
            continue;
        }

        let pid: u32 = match components[1].parse() {
            Ok(p) => p,
            Err(_) => continue,
        };

        let family = match components[4] {
            "IPv4" => Family::V4,
            "IPv6" => Family::V6,
            _ => continue,
        };

        // NODE column holds the transport; NAME and the optional state follow it
        let Some(node_idx) = components
            .iter()
            .skip(5)
            .position(|c| Transport::parse(c).is_some())
            .map(|i| i + 5)
        else {
            continue;
        };
        let Some(transport) = Transport::parse(components[node_idx]) else {
            continue;
        };
        let Some(name) = components.get(node_idx + 1) else {
            continue;
        };

        let local = name.split("->").next().unwrap_or(name);
        let Some((address, port)) = Utils::parse_endpoint(local, family) else {
            continue;
        };
        if port == 0 {
            continue;
        }

        let protocol = Protocol::new(transport, family);
        let state = match transport {
            Transport::Udp => None,
            Transport::Tcp => Some(
                components
                    .get(node_idx + 2)
                    .map(|s| TcpState::from_name(s))
                    .unwrap_or(TcpState::Unknown),
            ),
        };

        if !seen.insert((protocol, port, address, pid)) {
            continue;
        }

        entries.push(SocketEntry::new(
            protocol,
            address,
            port,
            state,
            CorrelationKey::Pid(pid),
        ));
    }

    entries
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PsRow {
    pid: u32,
    ppid: u32,
    uid: u32,
    rss_kb: u64,
    cpu: Option<Duration>,
    elapsed: Option<Duration>,
    comm: String,
}

/// Parse `ps -o pid=,ppid=,uid=,rss=,time=,etime=,comm=`.
fn parse_ps_table(output: &str) -> HashMap<u32, PsRow> {
    let mut rows = HashMap::new();

    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(pid), Some(ppid), Some(uid), Some(rss), Some(time), Some(etime)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            continue;
        };
        let (Ok(pid), Ok(ppid), Ok(uid)) = (pid.parse(), ppid.parse(), uid.parse()) else {
            continue;
        };

        rows.insert(
            pid,
            PsRow {
                pid,
                ppid,
                uid,
                rss_kb: rss.parse().unwrap_or(0),
                cpu: Utils::parse_clock(time),
                elapsed: Utils::parse_clock(etime),
                comm: parts.collect::<Vec<_>>().join(" "),
            },
        );
    }

    rows
}

/// Parse `ps -o pid=,args=`.
fn parse_ps_commands(output: &str) -> HashMap<u32, String> {
    output
        .lines()
        .filter_map(|line| {
            let (pid, args) = line.trim().split_once(char::is_whitespace)?;
            Some((pid.parse().ok()?, args.trim().to_string()))
        })
        .collect()
}

/// One `ps` snapshot reused for every socket of a scan.
pub struct DarwinPass {
    rows: HashMap<u32, PsRow>,
    commands: HashMap<u32, String>,
    children: HashMap<u32, u32>,
    users: HashMap<u32, Option<String>>,
    taken_at: SystemTime,
}

impl DarwinPass {
    fn new(rows: HashMap<u32, PsRow>, commands: HashMap<u32, String>, taken_at: SystemTime) -> Self {
        let mut children = HashMap::new();
        for row in rows.values() {
            *children.entry(row.ppid).or_insert(0) += 1;
        }
        Self {
            rows,
            commands,
            children,
            users: HashMap::new(),
            taken_at,
        }
    }

    fn username(&mut self, uid: u32) -> String {
        self.users
            .entry(uid)
            .or_insert_with(|| User::from_uid(Uid::from_raw(uid)).ok().flatten().map(|u| u.name))
            .clone()
            .unwrap_or_else(|| uid.to_string())
    }
}

impl ResolvePass for DarwinPass {
    fn resolve(&mut self, key: &CorrelationKey) -> Resolution {
        let CorrelationKey::Pid(pid) = *key else {
            return Resolution::NotFound;
        };
        let Some(row) = self.rows.get(&pid).cloned() else {
            return Resolution::NotFound;
        };

        let user = self.username(row.uid);
        Resolution::Resolved(ProcessInfo {
            pid,
            name: Some(Utils::short_name(&row.comm)),
            command: self.commands.get(&pid).cloned().or(Some(row.comm)),
            user: Some(user),
            start_time: row.elapsed.and_then(|e| self.taken_at.checked_sub(e)),
            memory_bytes: Some(row.rss_kb * 1024),
            cpu_time: row.cpu,
            children: Some(self.children.get(&pid).copied().unwrap_or(0)),
        })
    }
}
