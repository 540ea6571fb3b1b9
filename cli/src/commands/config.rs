//! Config command - show or change the saved defaults.

use anyhow::{bail, Context, Result};
use clap::{Subcommand, ValueEnum};
use portview_core::{Config, ConfigStore};

use crate::output::parse_color;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Print where the configuration file lives
    Path,

    /// Change one setting
    Set {
        #[arg(value_enum)]
        key: ConfigKey,
        value: String,
    },

    /// Set the color of a table column
    Color { column: String, color: String },

    /// Restore every default
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    Interval,
    Docker,
    ShowAll,
    LogTail,
    NoColor,
}

/// A validated change, applied inside `ConfigStore::update`.
#[derive(Debug, PartialEq)]
enum Change {
    Interval(u64),
    Docker(bool),
    ShowAll(bool),
    LogTail(usize),
    NoColor(bool),
    Color(String, String),
}

impl Change {
    fn parse(key: ConfigKey, value: &str) -> Result<Self> {
        let flag = || parse_flag(value).with_context(|| format!("{:?} takes true or false", key));
        let change = match key {
            ConfigKey::Interval => {
                let ms: u64 = value.parse().context("interval is a number of milliseconds")?;
                if ms == 0 {
                    bail!("interval must be greater than zero");
                }
                Self::Interval(ms)
            }
            ConfigKey::Docker => Self::Docker(flag()?),
            ConfigKey::ShowAll => Self::ShowAll(flag()?),
            ConfigKey::LogTail => Self::LogTail(value.parse().context("log tail is a line count")?),
            ConfigKey::NoColor => Self::NoColor(flag()?),
        };
        Ok(change)
    }

    fn color(column: &str, color: &str) -> Result<Self> {
        if parse_color(color).is_none() {
            bail!("unknown color '{}'", color);
        }
        Ok(Self::Color(column.to_lowercase(), color.to_lowercase()))
    }

    fn apply(self, config: &mut Config) {
        match self {
            Self::Interval(ms) => config.refresh_interval_ms = ms,
            Self::Docker(on) => config.docker = on,
            Self::ShowAll(on) => config.show_all = on,
            Self::LogTail(lines) => config.log_tail_lines = lines,
            Self::NoColor(on) => config.no_color = on,
            Self::Color(column, color) => {
                config.colors.insert(column, color);
            }
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

pub async fn run(command: Option<ConfigCommand>) -> Result<()> {
    let store = ConfigStore::new().context("Cannot locate the configuration directory")?;

    let change = match command.unwrap_or(ConfigCommand::Show) {
        ConfigCommand::Show => {
            let config = store.load().await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        ConfigCommand::Path => {
            println!("{}", store.path().display());
            return Ok(());
        }
        ConfigCommand::Reset => {
            store.save(&Config::default()).await?;
            println!("Restored defaults in {}", store.path().display());
            return Ok(());
        }
        ConfigCommand::Set { key, value } => Change::parse(key, &value)?,
        ConfigCommand::Color { column, color } => Change::color(&column, &color)?,
    };

    let config = store.update(|config| change.apply(config)).await?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
