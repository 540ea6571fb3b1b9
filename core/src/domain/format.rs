//! Human-readable formatting shared by every consumer of a snapshot.

use std::net::IpAddr;
use std::time::Duration;

/// Compact uptime: `42s`, `7m`, `3h 12m`, `2d 5h`.
pub fn format_uptime(elapsed: Option<Duration>) -> String {
    let Some(elapsed) = elapsed else {
        return "-".to_string();
    };

    let secs = elapsed.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Resident memory with a binary unit.
pub fn format_bytes(bytes: Option<u64>) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    match bytes {
        None | Some(0) => "-".to_string(),
        Some(b) if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        Some(b) if b >= MB => format!("{:.0} MB", b as f64 / MB as f64),
        Some(b) if b >= KB => format!("{:.0} KB", b as f64 / KB as f64),
        Some(b) => format!("{} B", b),
    }
}

/// CPU time as `1.5s` or `12m 03s`.
pub fn format_cpu_time(cpu: Option<Duration>) -> String {
    match cpu {
        None => "-".to_string(),
        Some(d) if d.as_secs() < 60 => format!("{:.1}s", d.as_secs_f64()),
        Some(d) => format!("{}m {:02}s", d.as_secs() / 60, d.as_secs() % 60),
    }
}

/// `*` for wildcard binds; v4-mapped v6 addresses are shown as v4.
pub fn format_address(addr: &IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) if v4.is_unspecified() => "*".to_string(),
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) if v6.is_unspecified() => "*".to_string(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) if v4.is_unspecified() => "*".to_string(),
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
    }
}

/// Docker's 12-character short id.
pub fn short_container_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Truncate to `max` characters, ending with an ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}
