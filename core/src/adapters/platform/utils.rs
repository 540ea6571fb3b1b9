//! Text parsing helpers shared by the command-driven backends.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::time::Duration;

use crate::domain::Family;

pub struct Utils;

impl Utils {
    /// Parse an address:port string.
    ///
    /// Handles multiple address formats:
    /// - IPv4: "127.0.0.1:3000" or "*:8080"
    /// - IPv6: "\[::1]:3000", "\[fe80::1%12]:8080" or "\[::]:445"
    ///
    /// A `*` host is the unspecified address of `family`.
    pub fn parse_endpoint(endpoint: &str, family: Family) -> Option<(IpAddr, u16)> {
        let (host, port_str) = if let Some(rest) = endpoint.strip_prefix('[') {
            let (host, tail) = rest.split_once(']')?;
            (host, tail.strip_prefix(':')?)
        } else {
            endpoint.rsplit_once(':')?
        };
        let port: u16 = port_str.parse().ok()?;

        // Drop interface zone ids such as `%12` or `%en0`
        let host = host.split('%').next().unwrap_or(host);
        let address = match host {
            "" | "*" => match family {
                Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            },
            other => other.parse().ok()?,
        };
        Some((address, port))
    }

    /// Parse a CSV line with quoted fields (`""` is an escaped quote).
    pub fn parse_csv_line(line: &str) -> Vec<String> {
        let mut fields = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '"' if in_quotes && chars.peek() == Some(&'"') => {
                    current.push('"');
                    chars.next();
                }
                '"' => in_quotes = !in_quotes,
                ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
                c => current.push(c),
            }
        }
        fields.push(current);
        fields
    }

    /// Parse `[dd-][hh:]mm:ss[.frac]` clocks printed by `ps` and `tasklist`.
    pub fn parse_clock(clock: &str) -> Option<Duration> {
        let clock = clock.trim();
        let (days, rest) = match clock.split_once('-') {
            Some((d, rest)) => (d.parse::<u64>().ok()?, rest),
            None => (0, clock),
        };

        let parts: Vec<&str> = rest.split(':').collect();
        if parts.is_empty() || parts.len() > 3 {
            return None;
        }
        let mut seconds = 0f64;
        for part in parts {
            let value: f64 = part.parse().ok()?;
            if value < 0.0 {
                return None;
            }
            seconds = seconds * 60.0 + value;
        }

        Some(Duration::from_secs(days * 86_400) + Duration::from_secs_f64(seconds))
    }

    /// File name of an executable path, without a trailing `.exe`.
    pub fn short_name(path: &str) -> String {
        let base = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        base.strip_suffix(".exe")
            .map(str::to_string)
            .unwrap_or(base)
    }
}
