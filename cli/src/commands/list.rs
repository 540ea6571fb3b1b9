//! List command - scan, inspect a port, or search by name.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use portview_core::PortViewEngine;

use crate::output::{self, Palette};
use crate::Settings;

pub async fn run(target: Option<&str>, settings: &Settings) -> Result<()> {
    let engine = super::engine()?;
    let palette = Palette::new(&settings.config.colors, settings.color);

    let target = target.map(str::trim).filter(|t| !t.is_empty() && *t != "scan");
    let Some(target) = target else {
        let snapshot = engine.scan(settings.show_all, settings.docker).await?;

        if settings.json {
            println!("{}", output::json(snapshot.records(), snapshot.captured_at())?);
            return Ok(());
        }

        if snapshot.is_empty() {
            println!("No listening ports found.");
        } else {
            for line in output::table_lines(snapshot.records(), snapshot.captured_at(), &palette, None, None) {
                println!("{}", line);
            }
        }
        println!("\n{}", output::footer(&snapshot, snapshot.len()));
        return Ok(());
    };

    let captured_at = std::time::SystemTime::now();
    let records = engine.inspect(target, settings.docker).await?;

    if settings.json {
        println!("{}", output::json(&records, captured_at)?);
        return Ok(());
    }

    if records.is_empty() {
        match target.parse::<u16>() {
            Ok(port) => println!("Nothing is using port {}.", port),
            Err(_) => println!("No listening ports match \"{}\".", target),
        }
        return Ok(());
    }

    if target.parse::<u16>().is_ok() {
        for (i, record) in records.iter().enumerate() {
            if i > 0 {
                println!();
            }
            for line in output::detail_lines(record, captured_at) {
                println!("{}", line);
            }
        }

        let interactive = atty::is(atty::Stream::Stdin) && atty::is(atty::Stream::Stdout);
        if let ([record], true) = (records.as_slice(), interactive) {
            if let Some(pid) = record.pid() {
                prompt_kill(&engine, pid, settings.force).await?;
            }
        }
    } else {
        for line in output::table_lines(&records, captured_at, &palette, None, None) {
            println!("{}", line);
        }
        println!("\nTotal: {} ports", records.len());
    }
    Ok(())
}

/// Offer to kill the single owner of an inspected port.
async fn prompt_kill(engine: &PortViewEngine, pid: u32, force: bool) -> Result<()> {
    print!("\nKill process {}? [y/N] ", pid);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    if !confirms(&answer) {
        return Ok(());
    }

    let termination = engine.kill(pid, force).await?;
    println!("Sent {} to PID {}", termination.signal, pid);
    Ok(())
}

fn confirms(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
