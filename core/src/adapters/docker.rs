//! Container runtime backed by the `docker` CLI.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::domain::{ContainerInfo, PortMapping, Transport};
use crate::error::{Error, Result};
use crate::ports::{ContainerRuntime, LogLine, LogOptions, LogSource, LogStream};

/// Timeout for `docker ps` and other short docker commands.
const DOCKER_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period passed to `docker stop --time` and `docker restart --time`.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Time allowed on top of the grace period for the daemon to kill and report.
const CONTROL_MARGIN: Duration = Duration::from_secs(15);

/// Lines buffered between the `docker logs` reader and the consumer.
const LOG_CHANNEL_CAPACITY: usize = 64;

const PS_FORMAT: &str = "{{.ID}}\t{{.Names}}\t{{.Image}}\t{{.Ports}}\t{{.State}}";

/// Talks to the docker daemon through its CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    query_timeout: Duration,
    stop_grace: Duration,
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_program("docker")
    }

    /// Use another docker-compatible CLI (`podman`, a wrapper script, ...).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            query_timeout: DOCKER_TIMEOUT,
            stop_grace: STOP_GRACE,
        }
    }

    /// Run a short docker query and return its stdout.
    async fn execute(&self, args: &[&str]) -> Result<String> {
        self.execute_within(args, self.query_timeout).await
    }

    async fn execute_within(&self, args: &[&str], limit: Duration) -> Result<String> {
        let result = timeout(limit, async {
            let output = Command::new(&self.program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await?;

            Ok::<_, std::io::Error>((output.status, output.stdout, output.stderr))
        })
        .await;

        match result {
            Ok(Ok((status, stdout, stderr))) => {
                if status.success() {
                    Ok(String::from_utf8_lossy(&stdout).into_owned())
                } else {
                    Err(Error::ContainerRuntime(
                        String::from_utf8_lossy(&stderr).trim().to_string(),
                    ))
                }
            }
            Ok(Err(e)) => Err(Error::ContainerSourceUnavailable(format!(
                "{}: {}",
                self.program, e
            ))),
            Err(_) => Err(Error::ContainerSourceUnavailable(format!(
                "{} {} timed out after {:?}",
                self.program,
                args.first().copied().unwrap_or_default(),
                limit
            ))),
        }
    }

    /// Run a control command against one container.
    ///
    /// Bounded by the stop grace period, not the query timeout. Once the
    /// daemon has the request, a spawn failure or overrun is a runtime
    /// error rather than a missing container source.
    async fn control(&self, verb: &str, id: &str) -> Result<String> {
        let grace = self.stop_grace.as_secs().max(1).to_string();
        let limit = self.stop_grace + CONTROL_MARGIN;
        match self.execute_within(&[verb, "--time", &grace, id], limit).await {
            Ok(_) => Ok(format!("{} {}", past_tense(verb), id)),
            Err(Error::ContainerRuntime(stderr)) => Err(runtime_error(id, stderr)),
            Err(Error::ContainerSourceUnavailable(reason)) => Err(Error::ContainerRuntime(reason)),
            Err(e) => Err(e),
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

fn past_tense(verb: &str) -> &'static str {
    match verb {
        "stop" => "Stopped",
        "restart" => "Restarted",
        _ => "Done:",
    }
}

/// Map docker's stderr to a not-found or generic runtime error.
fn runtime_error(id: &str, stderr: String) -> Error {
    if stderr.contains("No such container") || stderr.contains("no such container") {
        Error::ContainerNotFound(id.to_string())
    } else {
        Error::ContainerRuntime(stderr)
    }
}

impl ContainerRuntime for DockerCli {
    async fn list_running(&self) -> Result<Vec<ContainerInfo>> {
        let output = match self.execute(&["ps", "--format", PS_FORMAT]).await {
            Ok(out) => out,
            // Daemon down, socket refused, ...: all mean no container data
            Err(Error::ContainerRuntime(stderr)) => {
                return Err(Error::ContainerSourceUnavailable(stderr));
            }
            Err(e) => return Err(e),
        };

        let containers = parse_ps_output(&output);
        debug!(containers = containers.len(), "listed running containers");
        Ok(containers)
    }

    async fn stop(&self, id: &str) -> Result<String> {
        self.control("stop", id).await
    }

    async fn restart(&self, id: &str) -> Result<String> {
        self.control("restart", id).await
    }

    async fn logs(&self, id: &str, options: LogOptions) -> Result<LogStream> {
        // Resolve up front so a bad id fails here instead of mid-stream
        self.execute(&["inspect", "--format", "{{.Id}}", id])
            .await
            .map_err(|e| match e {
                Error::ContainerRuntime(stderr) => runtime_error(id, stderr),
                Error::ContainerSourceUnavailable(reason) => Error::ContainerRuntime(reason),
                other => other,
            })?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("logs");
        if let Some(tail) = options.tail {
            cmd.arg("--tail").arg(tail.to_string());
        }
        if options.follow {
            cmd.arg("--follow");
        }
        cmd.arg(id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::ContainerRuntime(format!("{}: {}", self.program, e)))?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(Error::ContainerRuntime("docker logs produced no pipes".into()));
        };

        let (tx, stream) = LogStream::channel(LOG_CHANNEL_CAPACITY);
        let id = id.to_string();
        tokio::spawn(async move {
            let mut out = BufReader::new(stdout).lines();
            let mut err = BufReader::new(stderr).lines();
            let (mut out_done, mut err_done) = (false, false);

            while !(out_done && err_done) {
                let next = tokio::select! {
                    line = out.next_line(), if !out_done => (LogSource::Stdout, line),
                    line = err.next_line(), if !err_done => (LogSource::Stderr, line),
                    _ = tx.closed() => break,
                };

                let item = match next {
                    (LogSource::Stdout, Ok(None)) => {
                        out_done = true;
                        continue;
                    }
                    (LogSource::Stderr, Ok(None)) => {
                        err_done = true;
                        continue;
                    }
                    (source, Ok(Some(text))) => Ok(LogLine { source, text }),
                    (_, Err(e)) => Err(Error::Io(e)),
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }

            if !(out_done && err_done) {
                // Stopped early; a following `docker logs` never exits on its own
                let _ = child.kill().await;
                return;
            }
            match child.wait().await {
                Ok(status) if !status.success() => {
                    warn!(container = %id, status = %status, "docker logs exited with failure");
                }
                Err(e) => warn!(container = %id, error = %e, "failed to reap docker logs"),
                _ => {}
            }
        });

        Ok(stream)
    }
}

fn port_regex() -> &'static Regex {
    static PORT_RE: OnceLock<Regex> = OnceLock::new();
    PORT_RE.get_or_init(|| {
        // host_ip:host_port[-end]->container_port[-end]/proto
        Regex::new(r"^(?:\[(?P<v6>[0-9a-fA-F:.]*)\]|(?P<ip>[0-9a-fA-F:.]*?)):(?P<host>\d+)(?:-\d+)?->(?P<ctr>\d+)(?:-\d+)?/(?P<proto>tcp|udp|sctp)$")
            .expect("port pattern is valid")
    })
}

/// Parse one `Ports` entry. Unpublished ports (`80/tcp`) yield `None`.
fn parse_port_mapping(segment: &str) -> Option<PortMapping> {
    let caps = port_regex().captures(segment.trim())?;
    let transport = Transport::parse(&caps["proto"])?;
    let host_port: u16 = caps["host"].parse().ok()?;
    let container_port: u16 = caps["ctr"].parse().ok()?;

    let host_ip = match (caps.name("v6"), caps.name("ip")) {
        (Some(v6), _) => Some(v6.as_str().parse().unwrap_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED))),
        // `:::8080` splits into ip `::` and port 8080
        (None, Some(ip)) if ip.as_str().contains(':') => ip.as_str().parse().ok(),
        (None, Some(ip)) if ip.as_str().is_empty() => Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        (None, Some(ip)) => ip.as_str().parse().ok(),
        (None, None) => None,
    };

    Some(PortMapping {
        host_port,
        container_port,
        transport,
        host_ip,
    })
}

/// Parse `docker ps --format` output.
///
/// ```text
/// a1b2c3d4e5f6	web	nginx:latest	0.0.0.0:8080->80/tcp, [::]:8080->80/tcp	running
/// ```
fn parse_ps_output(output: &str) -> Vec<ContainerInfo> {
    let mut containers = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 || fields[0].trim().is_empty() {
            continue;
        }

        let mut container = ContainerInfo::new(fields[0].trim(), fields[1].trim(), fields[2].trim());
        container.running = fields
            .get(4)
            .map_or(true, |state| state.trim().eq_ignore_ascii_case("running"));

        if let Some(ports) = fields.get(3) {
            for mapping in ports.split(',').filter_map(parse_port_mapping) {
                container.add_mapping(mapping);
            }
        }

        containers.push(container);
    }

    containers
}
