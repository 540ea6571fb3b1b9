//! Container command - stop, restart or read logs.

use anyhow::{bail, Result};
use portview_core::{ContainerAction, ContainerOutcome, LogOptions, LogSource};

use crate::Settings;

pub async fn stop(id: &str) -> Result<()> {
    control(id, ContainerAction::Stop).await
}

pub async fn restart(id: &str) -> Result<()> {
    control(id, ContainerAction::Restart).await
}

async fn control(id: &str, action: ContainerAction) -> Result<()> {
    let engine = super::engine()?;
    match engine.container_action(id, action).await? {
        ContainerOutcome::Completed { message } => println!("{}", message),
        ContainerOutcome::Logs(_) => bail!("unexpected log stream for {}", action.verb()),
    }
    Ok(())
}

/// Print log lines as they arrive. With `follow`, runs until Ctrl-C.
pub async fn logs(id: &str, tail: Option<usize>, follow: bool, settings: &Settings) -> Result<()> {
    let engine = super::engine()?;
    let options = LogOptions {
        tail: tail.or(Some(settings.config.log_tail_lines)),
        follow,
    };

    let mut stream = match engine.container_action(id, ContainerAction::FetchLogs(options)).await? {
        ContainerOutcome::Logs(stream) => stream,
        ContainerOutcome::Completed { message } => {
            println!("{}", message);
            return Ok(());
        }
    };

    loop {
        tokio::select! {
            line = stream.next_line() => match line {
                Some(line) => {
                    let line = line?;
                    match line.source {
                        LogSource::Stdout => println!("{}", line.text),
                        LogSource::Stderr => eprintln!("{}", line.text),
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
