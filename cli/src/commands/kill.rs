//! Kill command - terminate whatever listens on a port.

use anyhow::{bail, Result};

use crate::Settings;

pub async fn run(port: u16, settings: &Settings) -> Result<()> {
    let engine = super::engine()?;
    let outcomes = engine.kill_port(port, settings.force).await?;

    if outcomes.is_empty() {
        bail!("No process found listening on port {}", port);
    }

    if settings.json {
        let rows: Vec<_> = outcomes
            .iter()
            .map(|(pid, outcome)| match outcome {
                Ok(t) => serde_json::json!({
                    "port": port,
                    "pid": pid,
                    "signal": t.signal,
                    "escalated": t.escalated,
                }),
                Err(e) => serde_json::json!({
                    "port": port,
                    "pid": pid,
                    "error": e.to_string(),
                }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for (pid, outcome) in &outcomes {
            match outcome {
                Ok(t) => {
                    let note = if t.escalated { " (forced)" } else { "" };
                    println!("Sent {} to PID {} on port {}{}", t.signal, pid, port, note);
                }
                Err(e) => eprintln!("Failed to kill PID {} on port {}: {}", pid, port, e),
            }
        }
    }

    let failed = outcomes.iter().filter(|(_, o)| o.is_err()).count();
    if failed > 0 {
        bail!("{} of {} processes on port {} were not terminated", failed, outcomes.len(), port);
    }
    Ok(())
}
