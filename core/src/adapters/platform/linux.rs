//! Linux backend reading the `/proc` filesystem directly.
//!
//! Sockets come from `/proc/net/{tcp,tcp6,udp,udp6}` and carry an inode;
//! owners are found by walking `/proc/<pid>/fd` once per scan pass.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::unistd::{Uid, User};
use tracing::{debug, warn};

use crate::domain::{CorrelationKey, Family, ProcessInfo, Protocol, Resolution, SocketEntry, TcpState};
use crate::error::{Error, Result};
use crate::ports::{Platform, ResolvePass};

const SOCKET_TABLES: [(&str, Protocol); 4] = [
    ("net/tcp", Protocol::TCP),
    ("net/tcp6", Protocol::TCP6),
    ("net/udp", Protocol::UDP),
    ("net/udp6", Protocol::UDP6),
];

/// Fallback when `sysconf(_SC_CLK_TCK)` is unavailable.
const DEFAULT_CLOCK_TICKS: u64 = 100;

/// Linux-specific platform backed by procfs.
#[derive(Debug, Clone)]
pub struct LinuxPlatform {
    root: PathBuf,
    clock_ticks: u64,
}

impl LinuxPlatform {
    /// Create a backend for the live `/proc`.
    pub fn new() -> Self {
        let clock_ticks = nix::unistd::sysconf(nix::unistd::SysconfVar::CLK_TCK)
            .ok()
            .flatten()
            .and_then(|ticks| u64::try_from(ticks).ok())
            .filter(|ticks| *ticks > 0)
            .unwrap_or(DEFAULT_CLOCK_TICKS);

        Self {
            root: PathBuf::from("/proc"),
            clock_ticks,
        }
    }

    /// Create a backend reading a procfs-shaped tree at `root` (for testing).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            clock_ticks: DEFAULT_CLOCK_TICKS,
        }
    }

    pub fn detect() -> Result<Self> {
        Ok(Self::new())
    }
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for LinuxPlatform {
    type Pass = LinuxPass;

    fn name(&self) -> &'static str {
        "linux-procfs"
    }

    async fn enumerate_sockets(&self, include_non_listening: bool) -> Result<Vec<SocketEntry>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || read_socket_tables(&root, include_non_listening))
            .await
            .map_err(|e| Error::CommandFailed(format!("socket enumeration task failed: {}", e)))?
    }

    async fn begin_pass(&self) -> LinuxPass {
        let root = self.root.clone();
        let clock_ticks = self.clock_ticks;
        let built = tokio::task::spawn_blocking(move || LinuxPass::build(root, clock_ticks)).await;

        match built {
            Ok(pass) => pass,
            Err(e) => {
                warn!(error = %e, "process index task failed, owners will be unresolved");
                LinuxPass::empty(self.root.clone(), self.clock_ticks)
            }
        }
    }
}

// ============================================================================
// Socket tables
// ============================================================================

fn read_socket_tables(root: &Path, include_non_listening: bool) -> Result<Vec<SocketEntry>> {
    let mut entries = Vec::new();
    let mut readable = 0usize;
    let mut denied: Option<std::io::Error> = None;

    for (table, protocol) in SOCKET_TABLES {
        let path = root.join(table);
        match fs::read_to_string(&path) {
            Ok(content) => {
                readable += 1;
                entries.extend(
                    parse_socket_table(&content, protocol)
                        .into_iter()
                        .filter(|e| include_non_listening || e.is_listening()),
                );
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(table = table, "socket table not present");
            }
            Err(e) => {
                warn!(table = table, error = %e, "failed to read socket table");
                if e.kind() == ErrorKind::PermissionDenied {
                    denied = Some(e);
                }
            }
        }
    }

    if readable == 0 {
        return Err(match denied {
            Some(e) => Error::PermissionDenied(format!("{}: {}", root.join("net").display(), e)),
            None => Error::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("no socket tables under {}", root.join("net").display()),
            )),
        });
    }

    debug!(sockets = entries.len(), "enumerated procfs sockets");
    Ok(entries)
}

/// Parse one `/proc/net/{tcp,udp}[6]` table.
///
/// Rows with inode 0 (no owning socket object) or local port 0 are skipped.
fn parse_socket_table(content: &str, protocol: Protocol) -> Vec<SocketEntry> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                return None;
            }

            let (address, port) = parse_hex_endpoint(fields[1], protocol.family)?;
            let inode: u64 = fields[9].parse().ok()?;
            if inode == 0 || port == 0 {
                return None;
            }

            let state = (!protocol.is_udp()).then(|| TcpState::from_proc_hex(fields[3]));
            let mut entry =
                SocketEntry::new(protocol, address, port, state, CorrelationKey::Inode(inode));
            if let Ok(uid) = fields[7].parse() {
                entry = entry.with_uid(uid);
            }
            Some(entry)
        })
        .collect()
}

/// Decode `0100007F:0BB8` style endpoints.
///
/// Addresses are printed as native-endian 32-bit words of the network-order bytes.
fn parse_hex_endpoint(s: &str, family: Family) -> Option<(IpAddr, u16)> {
    let (addr_hex, port_hex) = s.rsplit_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;

    let address = match family {
        Family::V4 => {
            let word = u32::from_str_radix(addr_hex, 16).ok()?;
            IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes()))
        }
        Family::V6 => {
            if addr_hex.len() != 32 {
                return None;
            }
            let mut octets = [0u8; 16];
            for group in 0..4 {
                let word = u32::from_str_radix(&addr_hex[group * 8..group * 8 + 8], 16).ok()?;
                octets[group * 4..group * 4 + 4].copy_from_slice(&word.to_ne_bytes());
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };

    Some((address, port))
}

// ============================================================================
// Process resolution
// ============================================================================

/// Process index built once per scan.
pub struct LinuxPass {
    root: PathBuf,
    clock_ticks: u64,
    boot_time: Option<u64>,
    inode_to_pid: HashMap<u64, u32>,
    children: HashMap<u32, u32>,
    users: HashMap<u32, Option<String>>,
}

impl LinuxPass {
    fn empty(root: PathBuf, clock_ticks: u64) -> Self {
        Self {
            root,
            clock_ticks,
            boot_time: None,
            inode_to_pid: HashMap::new(),
            children: HashMap::new(),
            users: HashMap::new(),
        }
    }

    /// Walk `/proc/<pid>` once: socket inodes from `fd/`, parents from `stat`.
    fn build(root: PathBuf, clock_ticks: u64) -> Self {
        let mut pass = Self::empty(root, clock_ticks);
        pass.boot_time = fs::read_to_string(pass.root.join("stat"))
            .ok()
            .and_then(|s| parse_boot_time(&s));

        let dir = match fs::read_dir(&pass.root) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "cannot list process directory");
                return pass;
            }
        };

        let mut processes = 0usize;
        for entry in dir.flatten() {
            let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
                continue;
            };
            processes += 1;

            if let Some(ppid) = fs::read_to_string(entry.path().join("stat"))
                .ok()
                .and_then(|s| parse_stat(&s))
                .map(|stat| stat.ppid)
            {
                *pass.children.entry(ppid).or_insert(0) += 1;
            }

            // Other users' fd tables are unreadable without privileges
            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                let Ok(link) = fs::read_link(fd.path()) else {
                    continue;
                };
                if let Some(inode) = parse_socket_link(&link.to_string_lossy()) {
                    pass.inode_to_pid.entry(inode).or_insert(pid);
                }
            }
        }

        debug!(
            processes = processes,
            sockets = pass.inode_to_pid.len(),
            "built procfs inode index"
        );
        pass
    }

    fn username(&mut self, uid: u32) -> String {
        self.users
            .entry(uid)
            .or_insert_with(|| {
                User::from_uid(Uid::from_raw(uid))
                    .ok()
                    .flatten()
                    .map(|u| u.name)
            })
            .clone()
            .unwrap_or_else(|| uid.to_string())
    }

    fn resolve_pid(&mut self, pid: u32) -> Resolution {
        let dir = self.root.join(pid.to_string());
        if !dir.exists() {
            return Resolution::NotFound;
        }

        let mut denied = false;
        let mut read = |file: &str| match fs::read(dir.join(file)) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                denied |= e.kind() == ErrorKind::PermissionDenied;
                None
            }
        };

        let name = read("comm").map(|b| String::from_utf8_lossy(&b).trim().to_string());
        let cmdline = read("cmdline").map(|b| join_cmdline(&b));
        let status = read("status").map(|b| parse_status(&String::from_utf8_lossy(&b)));
        let stat = read("stat").and_then(|b| parse_stat(&String::from_utf8_lossy(&b)));

        // Exited between the existence check and the reads
        if name.is_none() && status.is_none() && stat.is_none() && !denied {
            return Resolution::NotFound;
        }

        let command = match (cmdline, name.as_deref()) {
            (Some(cmd), _) if !cmd.is_empty() => Some(cmd),
            (_, Some(name)) => Some(format!("[{}]", name)),
            _ => None,
        };

        let ticks = self.clock_ticks;
        let start_time = match (stat, self.boot_time) {
            (Some(stat), Some(btime)) => Some(
                UNIX_EPOCH + Duration::from_secs(btime) + ticks_to_duration(stat.start_ticks, ticks),
            ),
            _ => None,
        };

        let user = status.and_then(|s| s.uid).map(|uid| self.username(uid));

        let info = ProcessInfo {
            pid,
            name,
            command,
            user,
            start_time,
            memory_bytes: status.and_then(|s| s.rss_bytes),
            cpu_time: stat.map(|s| ticks_to_duration(s.utime + s.stime, ticks)),
            children: Some(self.children.get(&pid).copied().unwrap_or(0)),
        };

        if denied {
            Resolution::PermissionDenied(info)
        } else {
            Resolution::Resolved(info)
        }
    }
}

impl ResolvePass for LinuxPass {
    fn resolve(&mut self, key: &CorrelationKey) -> Resolution {
        match *key {
            CorrelationKey::Pid(pid) => self.resolve_pid(pid),
            CorrelationKey::Inode(inode) => match self.inode_to_pid.get(&inode).copied() {
                Some(pid) => self.resolve_pid(pid),
                None => Resolution::NotFound,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatFields {
    ppid: u32,
    utime: u64,
    stime: u64,
    start_ticks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatusFields {
    uid: Option<u32>,
    rss_bytes: Option<u64>,
}

/// Parse `/proc/<pid>/stat`. The comm field may contain spaces and
/// parentheses, so fields are counted from the last `)`.
fn parse_stat(content: &str) -> Option<StatFields> {
    let after_comm = content.get(content.rfind(')')? + 1..)?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    let field = |idx: usize| fields.get(idx).and_then(|s| s.parse::<u64>().ok());

    Some(StatFields {
        ppid: u32::try_from(field(1)?).ok()?,
        utime: field(11)?,
        stime: field(12)?,
        start_ticks: field(19)?,
    })
}

fn parse_status(content: &str) -> StatusFields {
    let mut status = StatusFields {
        uid: None,
        rss_bytes: None,
    };
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            status.uid = rest.split_whitespace().next().and_then(|s| s.parse().ok());
        } else if let Some(rest) = line.strip_prefix("VmRSS:") {
            status.rss_bytes = rest
                .split_whitespace()
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .map(|kb| kb * 1024);
        }
    }
    status
}

fn parse_boot_time(content: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|s| s.trim().parse().ok())
}

fn parse_socket_link(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

fn join_cmdline(raw: &[u8]) -> String {
    raw.split(|&b| b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part))
        .collect::<Vec<_>>()
        .join(" ")
}

fn ticks_to_duration(ticks: u64, per_second: u64) -> Duration {
    Duration::from_millis(ticks.saturating_mul(1000) / per_second.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    const TCP_TABLE: &str = r#"  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:0BB8 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 55 1 0000000000000000 100 0 0 10 0
   1: 0100007F:1538 00000000:0000 0A 00000000:00000000 00:00000000 00000000   999        0 9 1 0000000000000000 100 0 0 10 0
   2: 0100007F:0BB8 0100007F:D431 01 00000000:00000000 00:00000000 00000000  1000        0 77 1 0000000000000000 20 4 30 10 -1
   3: 0100007F:9C40 0100007F:0BB8 06 00000000:00000000 03:00001234 00000000     0        0 0 3 0000000000000000
"#;

    const TCP6_TABLE: &str = r#"  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000000000000000000001000000:1F90 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 4242 1 0000000000000000 100 0 0 10 0
"#;

    const UDP_TABLE: &str = r#"   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode ref pointer drops
  512: 3500007F:0035 00000000:0000 07 00000000:00000000 00:00000000 00000000   101        0 1313 2 0000000000000000 0
  513: 00000000:0000 00000000:0000 07 00000000:00000000 00:00000000 00000000   101        0 1314 2 0000000000000000 0
"#;

    #[test]
    fn test_parse_tcp_table() {
        let entries = parse_socket_table(TCP_TABLE, Protocol::TCP);
        // TIME_WAIT row with inode 0 is dropped
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].port, 3000);
        assert_eq!(entries[0].address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(entries[0].state, Some(TcpState::Listen));
        assert_eq!(entries[0].key, Some(CorrelationKey::Inode(55)));
        assert_eq!(entries[0].uid, Some(1000));

        assert_eq!(entries[1].port, 5432);
        assert_eq!(entries[1].address, IpAddr::V4(Ipv4Addr::LOCALHOST));

        assert_eq!(entries[2].state, Some(TcpState::Established));
        assert!(!entries[2].is_listening());
    }

    #[test]
    fn test_parse_tcp6_table() {
        let entries = parse_socket_table(TCP6_TABLE, Protocol::TCP6);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].address, IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(entries[0].port, 8080);
        assert_eq!(entries[0].protocol, Protocol::TCP6);
    }

    #[test]
    fn test_parse_udp_table_has_no_state() {
        let entries = parse_socket_table(UDP_TABLE, Protocol::UDP);
        // port 0 row is skipped
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].port, 53);
        assert_eq!(entries[0].address, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 53)));
        assert_eq!(entries[0].state, None);
        assert!(entries[0].is_listening());
    }

    #[test]
    fn test_parse_stat_with_spaces_in_comm() {
        let stat = "48291 (node (worker) x) S 1 48291 48291 0 -1 4194304 1000 0 0 0 150 50 0 0 20 0 11 0 12345 1000000 2000";
        let parsed = parse_stat(stat).unwrap();
        assert_eq!(parsed.ppid, 1);
        assert_eq!(parsed.utime, 150);
        assert_eq!(parsed.stime, 50);
        assert_eq!(parsed.start_ticks, 12345);
        assert!(parse_stat("garbage").is_none());
    }

    #[test]
    fn test_parse_status_and_helpers() {
        let status = parse_status("Name:\tnode\nUid:\t1000\t1000\t1000\t1000\nVmRSS:\t   2048 kB\n");
        assert_eq!(status.uid, Some(1000));
        assert_eq!(status.rss_bytes, Some(2048 * 1024));

        assert_eq!(parse_boot_time("cpu  1 2 3\nbtime 1700000000\n"), Some(1_700_000_000));
        assert_eq!(parse_socket_link("socket:[55]"), Some(55));
        assert_eq!(parse_socket_link("pipe:[55]"), None);
        assert_eq!(join_cmdline(b"node\0server.js\0--port\03000\0"), "node server.js --port 3000");
    }

    fn fake_proc() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("net")).unwrap();
        fs::write(root.join("net/tcp"), TCP_TABLE).unwrap();
        fs::write(root.join("stat"), "cpu  1 2 3\nbtime 1700000000\n").unwrap();

        let proc_dir = root.join("48291");
        fs::create_dir_all(proc_dir.join("fd")).unwrap();
        fs::write(proc_dir.join("comm"), "node\n").unwrap();
        fs::write(proc_dir.join("cmdline"), b"node\0server.js\0").unwrap();
        fs::write(proc_dir.join("status"), "Uid:\t0\t0\t0\t0\nVmRSS:\t100 kB\n").unwrap();
        fs::write(
            proc_dir.join("stat"),
            "48291 (node) S 1 48291 48291 0 -1 0 0 0 0 0 150 50 0 0 20 0 1 0 1000 0 0",
        )
        .unwrap();
        symlink("socket:[55]", proc_dir.join("fd/3")).unwrap();
        symlink("/dev/null", proc_dir.join("fd/0")).unwrap();

        let child_dir = root.join("48300");
        fs::create_dir_all(&child_dir).unwrap();
        fs::write(
            child_dir.join("stat"),
            "48300 (sh) S 48291 48291 48291 0 -1 0 0 0 0 0 0 0 0 0 20 0 1 0 2000 0 0",
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_enumerate_fake_proc() {
        let dir = fake_proc();
        let platform = LinuxPlatform::with_root(dir.path());

        let listening = platform.enumerate_sockets(false).await.unwrap();
        assert_eq!(listening.len(), 2);

        let all = platform.enumerate_sockets(true).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_tables_fail_enumeration() {
        let dir = tempfile::tempdir().unwrap();
        let platform = LinuxPlatform::with_root(dir.path());
        assert!(platform.enumerate_sockets(false).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_through_inode_index() {
        let dir = fake_proc();
        let platform = LinuxPlatform::with_root(dir.path());
        let mut pass = platform.begin_pass().await;

        let Resolution::Resolved(info) = pass.resolve(&CorrelationKey::Inode(55)) else {
            panic!("inode 55 should resolve");
        };
        assert_eq!(info.pid, 48291);
        assert_eq!(info.name.as_deref(), Some("node"));
        assert_eq!(info.command.as_deref(), Some("node server.js"));
        assert_eq!(info.memory_bytes, Some(100 * 1024));
        assert_eq!(info.cpu_time, Some(Duration::from_secs(2)));
        assert_eq!(info.children, Some(1));
        assert_eq!(
            info.start_time,
            Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000 + 10))
        );
        assert!(info.user.is_some());

        // Inode 9 belongs to a process we cannot see
        assert_eq!(pass.resolve(&CorrelationKey::Inode(9)), Resolution::NotFound);
        // Process vanished
        assert_eq!(pass.resolve(&CorrelationKey::Pid(999_999)), Resolution::NotFound);
    }

    #[test]
    fn test_kernel_thread_command_falls_back_to_name() {
        let dir = tempfile::tempdir().unwrap();
        let proc_dir = dir.path().join("2");
        fs::create_dir_all(&proc_dir).unwrap();
        fs::write(proc_dir.join("comm"), "kthreadd\n").unwrap();
        fs::write(proc_dir.join("cmdline"), b"").unwrap();

        let mut pass = LinuxPass::empty(dir.path().to_path_buf(), 100);
        let info = pass.resolve(&CorrelationKey::Pid(2)).into_process().unwrap();
        assert_eq!(info.command.as_deref(), Some("[kthreadd]"));
    }
}
