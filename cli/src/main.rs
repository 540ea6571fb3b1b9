//! PortView CLI - See what's on your ports, then act on it
//!
//! Lists listening sockets with their owning processes and published
//! containers, inspects a single port, kills owners, and runs a live
//! watch view.

mod commands;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use portview_core::{Config, ConfigStore};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portview")]
#[command(author, version, about = "See what's on your ports, then act on it")]
#[command(propagate_version = true)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// `scan`, a port number to inspect, or a process/container name
    target: Option<String>,

    /// Kill whatever listens on this port
    #[arg(short = 'k', long = "kill", value_name = "PORT")]
    kill: Option<u16>,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(clap::Args, Clone, Copy)]
struct GlobalArgs {
    /// Force kill (SIGKILL) without graceful shutdown
    #[arg(short, long, global = true)]
    force: bool,

    /// Include non-listening sockets
    #[arg(short, long, global = true)]
    all: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Show ports published by running containers
    #[arg(long, global = true)]
    docker: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Live view, refreshed on an interval
    Watch {
        /// Port number or name fragment to follow
        query: Option<String>,

        /// Refresh interval in milliseconds
        #[arg(long, value_name = "MS")]
        interval: Option<u64>,
    },

    /// Kill the process listening on a port
    Kill {
        /// Port number to kill
        port: u16,
    },

    /// Stop, restart or read the logs of a container
    Container {
        #[arg(value_enum)]
        action: ContainerCommand,

        /// Container id or name
        id: String,

        /// Lines of history to show
        #[arg(long, value_name = "N")]
        tail: Option<usize>,

        /// Keep streaming new lines
        #[arg(long)]
        follow: bool,
    },

    /// Show or change the saved defaults
    Config {
        #[command(subcommand)]
        action: Option<commands::config::ConfigCommand>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ContainerCommand {
    Stop,
    Restart,
    Logs,
}

/// Effective settings after merging the config file and flags.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: Config,
    pub force: bool,
    pub show_all: bool,
    pub json: bool,
    pub docker: bool,
    pub color: bool,
}

impl Settings {
    fn new(config: Config, args: GlobalArgs) -> Self {
        let color = !(args.no_color || config.no_color) && atty::is(atty::Stream::Stdout);
        Self {
            force: args.force,
            show_all: args.all || config.show_all,
            json: args.json,
            docker: args.docker || config.docker,
            color,
            config,
        }
    }
}

fn init_logging(verbose: bool, watching: bool) {
    // A live view owns the terminal, so only errors reach stderr there
    let default = match (verbose, watching) {
        (true, _) => "debug",
        (false, true) => "error",
        (false, false) => "warn",
    };
    let filter = EnvFilter::try_from_env("PORTVIEW_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn load_config() -> Config {
    let store = match ConfigStore::new() {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "using default configuration");
            return Config::default();
        }
    };
    match store.load().await {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, path = %store.path().display(), "using default configuration");
            Config::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(
        cli.global.verbose,
        matches!(cli.command, Some(Commands::Watch { .. })),
    );

    let settings = Settings::new(load_config().await, cli.global);

    match cli.command {
        Some(Commands::Watch { query, interval }) => {
            commands::watch::run(query, interval, &settings).await?;
        }
        Some(Commands::Kill { port }) => {
            commands::kill::run(port, &settings).await?;
        }
        Some(Commands::Container {
            action,
            id,
            tail,
            follow,
        }) => match action {
            ContainerCommand::Stop => commands::container::stop(&id).await?,
            ContainerCommand::Restart => commands::container::restart(&id).await?,
            ContainerCommand::Logs => commands::container::logs(&id, tail, follow, &settings).await?,
        },
        Some(Commands::Config { action }) => {
            commands::config::run(action).await?;
        }
        None => {
            if let Some(port) = cli.kill {
                commands::kill::run(port, &settings).await?;
            } else {
                commands::list::run(cli.target.as_deref(), &settings).await?;
            }
        }
    }

    Ok(())
}
