//! Windows backend.
//!
//! Uses `netstat -ano` for sockets and `tasklist /V /FO CSV` for process
//! metadata. Command lines and parent pids come from a best-effort CIM query.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::{CorrelationKey, Family, ProcessInfo, Protocol, Resolution, SocketEntry, TcpState, Transport};
use crate::error::{Error, Result};
use crate::ports::{Platform, ResolvePass};

use super::utils::Utils;

/// Windows-specific platform using netstat and tasklist.
#[derive(Debug, Default, Clone)]
pub struct WindowsPlatform;

impl WindowsPlatform {
    pub fn new() -> Self {
        Self
    }

    pub fn detect() -> Result<Self> {
        Ok(Self::new())
    }

    async fn run(program: &str, args: &[&str]) -> Result<String> {
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::CommandFailed(format!("{} {}: {}", program, args.join(" "), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Access is denied") {
                return Err(Error::PermissionDenied(format!("{}: {}", program, stderr.trim())));
            }
            return Err(Error::CommandFailed(format!(
                "{} {} failed: {}",
                program,
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Platform for WindowsPlatform {
    type Pass = WindowsPass;

    fn name(&self) -> &'static str {
        "windows-netstat"
    }

    async fn enumerate_sockets(&self, include_non_listening: bool) -> Result<Vec<SocketEntry>> {
        let output = Self::run("netstat", &["-ano"]).await?;
        let entries: Vec<SocketEntry> = parse_netstat_output(&output)
            .into_iter()
            .filter(|e| include_non_listening || e.is_listening())
            .collect();

        debug!(sockets = entries.len(), "enumerated netstat sockets");
        Ok(entries)
    }

    async fn begin_pass(&self) -> WindowsPass {
        let (tasklist, cim) = tokio::join!(
            Self::run("tasklist", &["/V", "/FO", "CSV", "/NH"]),
            Self::run(
                "powershell",
                &[
                    "-NoProfile",
                    "-Command",
                    "Get-CimInstance Win32_Process | Select-Object ProcessId,ParentProcessId,CreationDate,CommandLine | ConvertTo-Json -Compress",
                ],
            ),
        );

        let tasks = match tasklist {
            Ok(out) => parse_tasklist_output(&out),
            Err(e) => {
                warn!(error = %e, "tasklist failed");
                HashMap::new()
            }
        };
        let details = match cim {
            Ok(out) => parse_cim_output(&out),
            Err(e) => {
                debug!(error = %e, "process detail query unavailable");
                HashMap::new()
            }
        };

        WindowsPass::new(tasks, details)
    }
}

/// Parse the output of `netstat -ano`.
///
/// ```text
///   Proto  Local Address          Foreign Address        State           PID
///   TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       1020
///   TCP    [::]:445               [::]:0                 LISTENING       4
///   UDP    0.0.0.0:5353           *:*                                    2000
/// ```
fn parse_netstat_output(output: &str) -> Vec<SocketEntry> {
    let mut results = Vec::new();
    let mut seen: HashSet<(Protocol, u16, IpAddr, u32)> = HashSet::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(transport) = parts.first().and_then(|p| Transport::parse(p)) else {
            continue;
        };

        let (state, pid) = match transport {
            Transport::Tcp if parts.len() >= 5 => (Some(TcpState::from_name(parts[3])), parts[4]),
            Transport::Udp if parts.len() >= 4 => (None, parts[3]),
            _ => continue,
        };
        let Ok(pid) = pid.parse::<u32>() else {
            continue;
        };

        let local = parts[1];
        let family = if local.starts_with('[') { Family::V6 } else { Family::V4 };
        let Some((address, port)) = Utils::parse_endpoint(local, family) else {
            continue;
        };
        if port == 0 {
            continue;
        }

        let protocol = Protocol::new(transport, family);
        if seen.insert((protocol, port, address, pid)) {
            results.push(SocketEntry::new(
                protocol,
                address,
                port,
                state,
                CorrelationKey::Pid(pid),
            ));
        }
    }

    results
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TaskRow {
    name: String,
    memory_bytes: Option<u64>,
    user: Option<String>,
    cpu_time: Option<Duration>,
}

/// Parse `tasklist /V /FO CSV /NH`.
///
/// ```text
/// "node.exe","5432","Console","1","45,000 K","Running","DESK\dev","0:00:12","N/A"
/// ```
fn parse_tasklist_output(output: &str) -> HashMap<u32, TaskRow> {
    let mut map = HashMap::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields = Utils::parse_csv_line(line);
        if fields.len() < 2 {
            continue;
        }
        let Ok(pid) = fields[1].parse::<u32>() else {
            continue;
        };

        let memory_bytes = fields.get(4).and_then(|m| {
            let digits: String = m.chars().filter(char::is_ascii_digit).collect();
            digits.parse::<u64>().ok().map(|kb| kb * 1024)
        });
        let user = fields
            .get(6)
            .filter(|u| !u.is_empty() && u.as_str() != "N/A")
            .cloned();
        let cpu_time = fields.get(7).and_then(|c| Utils::parse_clock(c));

        map.insert(
            pid,
            TaskRow {
                name: Utils::short_name(&fields[0]),
                memory_bytes,
                user,
                cpu_time,
            },
        );
    }

    map
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CimProcess {
    process_id: u32,
    #[serde(default)]
    parent_process_id: Option<u32>,
    #[serde(default)]
    creation_date: Option<String>,
    #[serde(default)]
    command_line: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CimOutput {
    Many(Vec<CimProcess>),
    One(CimProcess),
}

/// Parse the JSON emitted by `ConvertTo-Json` for `Win32_Process`.
fn parse_cim_output(output: &str) -> HashMap<u32, CimProcess> {
    let parsed: CimOutput = match serde_json::from_str(output.trim()) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "unparseable process detail output");
            return HashMap::new();
        }
    };
    let list = match parsed {
        CimOutput::Many(list) => list,
        CimOutput::One(one) => vec![one],
    };
    list.into_iter().map(|p| (p.process_id, p)).collect()
}

/// `/Date(1700000000000)/` as emitted by PowerShell's JSON serializer.
fn parse_cim_date(value: &str) -> Option<SystemTime> {
    let millis = value.strip_prefix("/Date(")?.strip_suffix(")/")?;
    // Offsets such as `+0100` may trail the timestamp
    let millis = millis
        .split(|c| c == '+' || c == '-')
        .find(|s| !s.is_empty())?;
    let millis: u64 = millis.parse().ok()?;
    Some(UNIX_EPOCH + Duration::from_millis(millis))
}

/// One tasklist and CIM snapshot reused for every socket of a scan.
pub struct WindowsPass {
    tasks: HashMap<u32, TaskRow>,
    details: HashMap<u32, CimProcess>,
    children: HashMap<u32, u32>,
}

impl WindowsPass {
    fn new(tasks: HashMap<u32, TaskRow>, details: HashMap<u32, CimProcess>) -> Self {
        let mut children = HashMap::new();
        for detail in details.values() {
            if let Some(ppid) = detail.parent_process_id {
                *children.entry(ppid).or_insert(0) += 1;
            }
        }
        Self {
            tasks,
            details,
            children,
        }
    }
}

impl ResolvePass for WindowsPass {
    fn resolve(&mut self, key: &CorrelationKey) -> Resolution {
        let CorrelationKey::Pid(pid) = *key else {
            return Resolution::NotFound;
        };

        let task = self.tasks.get(&pid);
        let detail = self.details.get(&pid);
        if task.is_none() && detail.is_none() {
            return Resolution::NotFound;
        }

        let name = task.map(|t| t.name.clone());
        let command = detail
            .and_then(|d| d.command_line.clone())
            .filter(|c| !c.is_empty())
            .or_else(|| name.clone());

        let info = ProcessInfo {
            pid,
            name,
            command,
            user: task.and_then(|t| t.user.clone()),
            start_time: detail
                .and_then(|d| d.creation_date.as_deref())
                .and_then(parse_cim_date),
            memory_bytes: task.and_then(|t| t.memory_bytes),
            cpu_time: task.and_then(|t| t.cpu_time),
            children: detail.map(|_| self.children.get(&pid).copied().unwrap_or(0)),
        };

        // tasklist hides the owner of processes the caller may not query
        if pid > 4 && info.user.is_none() {
            Resolution::PermissionDenied(info)
        } else {
            Resolution::Resolved(info)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_parse_netstat_output() {
        let output = r#"
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       1020
  TCP    [::]:445               [::]:0                 LISTENING       4
  TCP    [::]:445               [::]:0                 LISTENING       4
  TCP    10.0.0.2:50000         1.2.3.4:443            ESTABLISHED     900
  UDP    0.0.0.0:5353           *:*                                    2000
"#;

        let entries = parse_netstat_output(output);
        assert_eq!(entries.len(), 4);

        assert_eq!(entries[0].address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(entries[0].state, Some(TcpState::Listen));
        assert_eq!(entries[0].key, Some(CorrelationKey::Pid(1020)));

        assert_eq!(entries[1].protocol, Protocol::TCP6);
        assert_eq!(entries[1].address, IpAddr::V6(Ipv6Addr::UNSPECIFIED));

        assert!(!entries[2].is_listening());

        assert_eq!(entries[3].protocol, Protocol::UDP);
        assert_eq!(entries[3].state, None);
        assert_eq!(entries[3].key, Some(CorrelationKey::Pid(2000)));
    }

    #[test]
    fn test_parse_tasklist_output() {
        let output = r#""System","4","Services","0","152 K","Unknown","N/A","0:10:00","N/A"
"node.exe","5432","Console","1","45,000 K","Running","DESK\dev","0:00:12","N/A"
"#;

        let tasks = parse_tasklist_output(output);
        let node = &tasks[&5432];
        assert_eq!(node.name, "node");
        assert_eq!(node.memory_bytes, Some(45_000 * 1024));
        assert_eq!(node.user.as_deref(), Some(r"DESK\dev"));
        assert_eq!(node.cpu_time, Some(Duration::from_secs(12)));
        assert_eq!(tasks[&4].user, None);
    }

    #[test]
    fn test_pass_merges_process_details() {
        let tasks = parse_tasklist_output(
            r#""node.exe","5432","Console","1","45,000 K","Running","DESK\dev","0:00:12","N/A""#,
        );
        let details = parse_cim_output(
            r#"[{"ProcessId":5432,"ParentProcessId":1,"CreationDate":"/Date(1700000000000)/","CommandLine":"node server.js"},
                {"ProcessId":6000,"ParentProcessId":5432,"CreationDate":null,"CommandLine":null}]"#,
        );
        let mut pass = WindowsPass::new(tasks, details);

        let info = pass.resolve(&CorrelationKey::Pid(5432)).into_process().unwrap();
        assert_eq!(info.command.as_deref(), Some("node server.js"));
        assert_eq!(info.children, Some(1));
        assert_eq!(
            info.start_time,
            Some(UNIX_EPOCH + Duration::from_millis(1_700_000_000_000))
        );

        // Known only to CIM, so the owner could not be read
        assert!(matches!(
            pass.resolve(&CorrelationKey::Pid(6000)),
            Resolution::PermissionDenied(_)
        ));
        assert_eq!(pass.resolve(&CorrelationKey::Pid(7)), Resolution::NotFound);
    }

    #[test]
    fn test_parse_single_cim_object() {
        let details = parse_cim_output(r#"{"ProcessId":9,"ParentProcessId":null,"CreationDate":null,"CommandLine":"x"}"#);
        assert_eq!(details[&9].command_line.as_deref(), Some("x"));
    }
}
