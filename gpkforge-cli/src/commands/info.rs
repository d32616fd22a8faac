//! `gpkforge info` - package summary display.

use std::path::Path;

use console::style;
use serde_json::json;

use super::{build_registry, CommandResult};
use crate::Cli;

pub fn run(cli: &Cli, package: &Path, json: bool) -> CommandResult {
    let registry = build_registry(cli)?;
    let package = registry.open_package_file(package)?;
    package.load()?;
    let summary = package.summary();
    let tables = package.tables()?;

    if json {
        let value = json!({
            "name": package.name(),
            "file_version": summary.file_version,
            "licensee_version": summary.licensee_version,
            "folder": summary.folder_name,
            "guid": summary.guid.to_string(),
            "engine_version": summary.engine_version,
            "source_compressed": !package.source_compression().is_empty(),
            "names": tables.names.len(),
            "exports": tables.exports.len(),
            "imports": tables.imports.len(),
            "generations": summary.generations.len(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", style(package.name()).bold());
    println!(
        "  version     {} / {}",
        summary.file_version, summary.licensee_version
    );
    println!("  folder      {}", summary.folder_name);
    println!("  guid        {}", summary.guid);
    println!("  engine      {}", summary.engine_version);
    println!(
        "  compressed  {}",
        if package.source_compression().is_empty() {
            "no".to_string()
        } else {
            format!("yes ({:#04x})", package.source_compression().bits())
        }
    );
    println!(
        "  tables      {} names, {} exports, {} imports",
        tables.names.len(),
        tables.exports.len(),
        tables.imports.len()
    );
    println!("  generations {}", summary.generations.len());
    Ok(())
}
