//! CLI command implementations.

pub mod dircache;
pub mod extract;
pub mod info;
pub mod list;
pub mod resave;

use std::error::Error;
use std::sync::Arc;

use gpkforge::{EngineConfig, Registry};
use tracing::debug;

use crate::Cli;

/// Common result type for commands.
pub type CommandResult = Result<(), Box<dyn Error>>;

/// Build a registry from the CLI's config flags.
pub fn build_registry(cli: &Cli) -> Result<Arc<Registry>, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_default()?,
    };
    if let Some(root) = &cli.content_root {
        config.content_root = root.clone();
    }
    debug!(content_root = %config.content_root.display(), "engine configuration resolved");
    Ok(Registry::new(config))
}
