//! Table, detail and JSON rendering.

use std::time::SystemTime;

use chrono::{DateTime, Local};
use crossterm::style::{Color, Stylize};
use portview_core::format::{
    format_address, format_bytes, format_cpu_time, format_uptime, short_container_id, truncate,
};
use portview_core::{
    ColorConfig, ConnectionRecord, ContainerSourceStatus, Snapshot, SortDirection, SortKey, SortOrder,
};

/// Column colors, resolved once from the user's `colors` table.
pub struct Palette {
    enabled: bool,
    colors: ColorConfig,
}

const DEFAULT_COLORS: [(&str, &str); 6] = [
    ("header", "yellow"),
    ("port", "cyan"),
    ("pid", "yellow"),
    ("process", "green"),
    ("user", "magenta"),
    ("container", "blue"),
];

impl Palette {
    pub fn new(overrides: &ColorConfig, enabled: bool) -> Self {
        let mut colors: ColorConfig = DEFAULT_COLORS
            .iter()
            .map(|(column, color)| (column.to_string(), color.to_string()))
            .collect();
        colors.extend(overrides.iter().map(|(k, v)| (k.to_lowercase(), v.clone())));
        Self { enabled, colors }
    }

    #[cfg(test)]
    pub fn plain() -> Self {
        Self::new(&ColorConfig::new(), false)
    }

    /// Color already padded text for `column`.
    pub fn paint(&self, column: &str, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }
        match self.colors.get(column).and_then(|name| parse_color(name)) {
            Some(color) => text.with(color).to_string(),
            None => text.to_string(),
        }
    }

    pub fn highlight(&self, text: &str) -> String {
        if self.enabled {
            text.reverse().to_string()
        } else {
            format!("> {}", text)
        }
    }
}

pub(crate) fn parse_color(name: &str) -> Option<Color> {
    let color = match name.to_lowercase().as_str() {
        "black" => Color::Black,
        "red" => Color::Red,
        "green" => Color::Green,
        "yellow" => Color::Yellow,
        "blue" => Color::Blue,
        "magenta" => Color::Magenta,
        "cyan" => Color::Cyan,
        "white" => Color::White,
        "grey" | "gray" => Color::Grey,
        "darkgrey" | "darkgray" => Color::DarkGrey,
        "darkred" => Color::DarkRed,
        "darkgreen" => Color::DarkGreen,
        "darkyellow" => Color::DarkYellow,
        "darkblue" => Color::DarkBlue,
        "darkmagenta" => Color::DarkMagenta,
        "darkcyan" => Color::DarkCyan,
        _ => return None,
    };
    Some(color)
}

/// Column layout: (key, width, palette column).
const COLUMNS: [(SortKey, usize, &str); 9] = [
    (SortKey::Port, 6, "port"),
    (SortKey::Proto, 6, "proto"),
    (SortKey::Pid, 8, "pid"),
    (SortKey::Address, 16, "address"),
    (SortKey::User, 10, "user"),
    (SortKey::Process, 16, "process"),
    (SortKey::Uptime, 8, "uptime"),
    (SortKey::Memory, 8, "memory"),
    (SortKey::Command, 0, "command"),
];

const COMMAND_WIDTH: usize = 40;

fn cells(record: &ConnectionRecord, captured_at: SystemTime) -> [String; 9] {
    let process = record.process.as_deref();
    let mut command = record.command().map(|c| c.into_owned()).unwrap_or_else(|| "-".into());
    if !record.synthetic {
        if let Some(container) = record.container_label() {
            command = format!("[{}] {}", container, command);
        }
    }

    [
        record.port().to_string(),
        record.protocol().label().to_string(),
        record.pid().map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
        format_address(&record.address()),
        record.user().map(|u| u.into_owned()).unwrap_or_else(|| "-".into()),
        record.process_name().unwrap_or("-").to_string(),
        format_uptime(process.and_then(|p| p.uptime_at(captured_at))),
        format_bytes(process.and_then(|p| p.memory_bytes)),
        command,
    ]
}

fn header(order: Option<SortOrder>) -> Vec<String> {
    COLUMNS
        .iter()
        .map(|(key, _, _)| match order {
            Some(order) if order.key == *key => {
                let arrow = match order.direction {
                    SortDirection::Asc => "▲",
                    SortDirection::Desc => "▼",
                };
                format!("{}{}", key.label(), arrow)
            }
            _ => key.label().to_string(),
        })
        .collect()
}

fn layout(texts: &[String]) -> Vec<String> {
    texts
        .iter()
        .zip(COLUMNS.iter())
        .map(|(text, (_, width, _))| {
            if *width == 0 {
                truncate(text, COMMAND_WIDTH)
            } else {
                format!("{:<width$}", truncate(text, width - 1), width = *width)
            }
        })
        .collect()
}

/// Render records as table lines. `order` marks the sorted column and
/// `selected` highlights one row.
pub fn table_lines(
    records: &[ConnectionRecord],
    captured_at: SystemTime,
    palette: &Palette,
    order: Option<SortOrder>,
    selected: Option<usize>,
) -> Vec<String> {
    let mut lines = Vec::with_capacity(records.len() + 2);
    lines.push(palette.paint("header", &layout(&header(order)).join(" ")));
    lines.push("-".repeat(100));

    for (i, record) in records.iter().enumerate() {
        let padded = layout(&cells(record, captured_at));
        if selected == Some(i) {
            lines.push(palette.highlight(&padded.join(" ")));
            continue;
        }
        let row: Vec<String> = padded
            .iter()
            .zip(COLUMNS.iter())
            .map(|(text, (_, _, column))| {
                let column = if record.synthetic && *column == "process" {
                    "container"
                } else {
                    column
                };
                palette.paint(column, text)
            })
            .collect();
        lines.push(row.join(" "));
    }
    lines
}

/// Every known field of one record, one per line.
pub fn detail_lines(record: &ConnectionRecord, captured_at: SystemTime) -> Vec<String> {
    let process = record.process.as_deref();
    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());

    let mut lines = vec![
        format!("Port:      {}", record.port()),
        format!("Protocol:  {}", record.protocol()),
        format!("Address:   {}", format_address(&record.address())),
        format!("State:     {}", or_dash(record.socket.state.map(|s| s.to_string()))),
        format!("PID:       {}", or_dash(record.pid().map(|p| p.to_string()))),
        format!("Process:   {}", record.process_name().unwrap_or("-")),
        format!("User:      {}", or_dash(record.user().map(|u| u.into_owned()))),
        format!("Command:   {}", or_dash(record.command().map(|c| c.into_owned()))),
        format!("Uptime:    {}", format_uptime(process.and_then(|p| p.uptime_at(captured_at)))),
        format!("Memory:    {}", format_bytes(process.and_then(|p| p.memory_bytes))),
        format!("CPU time:  {}", format_cpu_time(process.and_then(|p| p.cpu_time))),
        format!("Children:  {}", or_dash(process.and_then(|p| p.children).map(|c| c.to_string()))),
    ];

    for tag in &record.containers {
        lines.push(format!(
            "Container: {} ({}) {} {}",
            tag.name,
            short_container_id(&tag.id),
            tag.image,
            tag.mapping.describe()
        ));
    }
    lines
}

/// Records as one pretty JSON array.
pub fn json(records: &[ConnectionRecord], captured_at: SystemTime) -> serde_json::Result<String> {
    let serialized: Vec<_> = records.iter().map(|r| r.to_serialized(captured_at)).collect();
    serde_json::to_string_pretty(&serialized)
}

/// `N ports · docker: ... · 14:03:22`
pub fn footer(snapshot: &Snapshot, shown: usize) -> String {
    let time: DateTime<Local> = snapshot.captured_at().into();
    let mut parts = vec![format!("{} ports", shown)];
    match snapshot.container_status() {
        ContainerSourceStatus::Disabled => {}
        ContainerSourceStatus::Available { containers } => {
            parts.push(format!("docker: {} running", containers))
        }
        ContainerSourceStatus::Unavailable { reason } => {
            parts.push(format!("docker unavailable: {}", truncate(reason, 40)))
        }
    }
    parts.push(time.format("%H:%M:%S").to_string());
    parts.join(" · ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use portview_core::{CorrelationKey, ProcessInfo, Protocol, SocketEntry, TcpState};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    fn node() -> ConnectionRecord {
        let socket = SocketEntry::new(
            Protocol::TCP,
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            3000,
            Some(TcpState::Listen),
            CorrelationKey::Pid(48291),
        );
        let process = ProcessInfo::unknown(48291)
            .with_name("node")
            .with_command("node server.js")
            .with_user("mark");
        ConnectionRecord::new(socket, Some(Arc::new(process)))
    }

    #[test]
    fn test_plain_table_row() {
        let lines = table_lines(&[node()], SystemTime::now(), &Palette::plain(), None, None);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("PORT"));
        assert!(lines[2].starts_with("3000"));
        assert!(lines[2].contains("48291"));
        assert!(lines[2].contains("node server.js"));
        assert!(lines[2].contains(" * "));
    }

    #[test]
    fn test_sorted_column_is_marked() {
        let order = SortOrder::new(SortKey::Pid, SortDirection::Desc);
        let lines = table_lines(&[], SystemTime::now(), &Palette::plain(), Some(order), None);
        assert!(lines[0].contains("PID▼"));
    }

    #[test]
    fn test_selected_row_is_highlighted_without_color() {
        let lines = table_lines(&[node()], SystemTime::now(), &Palette::plain(), None, Some(0));
        assert!(lines[2].starts_with("> 3000"));
    }

    #[test]
    fn test_palette_overrides_and_unknown_colors() {
        let mut overrides = ColorConfig::new();
        overrides.insert("Port".into(), "red".into());
        overrides.insert("pid".into(), "not-a-color".into());
        let palette = Palette::new(&overrides, true);

        assert_ne!(palette.paint("port", "3000"), "3000");
        assert_eq!(palette.paint("pid", "1"), "1");
        assert_eq!(palette.paint("command", "x"), "x");
    }

    #[test]
    fn test_detail_lists_fields() {
        let lines = detail_lines(&node(), SystemTime::now());
        assert!(lines.iter().any(|l| l == "PID:       48291"));
        assert!(lines.iter().any(|l| l == "State:     LISTEN"));
        assert!(lines.iter().any(|l| l == "Memory:    -"));
    }

    #[test]
    fn test_json_array() {
        let text = json(&[node()], SystemTime::now()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value[0]["port"], 3000);
        assert_eq!(value[0]["pid"], 48291);
        assert_eq!(value[0]["synthetic"], false);
    }
}
