//! `gpkforge extract` - composite package sub-extraction.

use std::path::Path;

use console::style;
use gpkforge::resolver::composite::CompositeMap;

use super::{build_registry, CommandResult};
use crate::Cli;

pub fn run(cli: &Cli, name: &str, output: &Path, mapper: &Path) -> CommandResult {
    let registry = build_registry(cli)?;
    registry.load_composite_mapper(mapper)?;

    let entry = registry
        .composite_entry(name)
        .ok_or_else(|| format!("no composite entry named {:?}", name))?;
    let bytes = CompositeMap::extract(&entry, &registry.config().content_root)?;

    // Prove the slice is a standalone package before writing it out.
    let package = gpkforge::Package::from_bytes(name, bytes.clone(), &registry)?;
    package.load()?;

    std::fs::write(output, &bytes)?;
    println!(
        "{} {} ({} bytes from {} @ {}) -> {}",
        style("extracted").green().bold(),
        entry.object_path,
        entry.byte_size,
        entry.container_file,
        entry.byte_offset,
        output.display()
    );
    Ok(())
}
