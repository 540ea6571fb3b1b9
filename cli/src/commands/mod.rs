//! Subcommand implementations.

pub mod config;
pub mod container;
pub mod kill;
pub mod list;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result};
use portview_core::PortViewEngine;

/// Engine over this machine's sockets and the `docker` CLI.
pub fn engine() -> Result<Arc<PortViewEngine>> {
    let engine = PortViewEngine::native().context("Cannot read sockets on this system")?;
    Ok(Arc::new(engine))
}
