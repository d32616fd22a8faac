//! `gpkforge names` / `exports` / `imports` - table listings.

use std::path::Path;

use console::style;
use gpkforge::PackageIndex;
use serde_json::json;

use super::{build_registry, CommandResult};
use crate::Cli;

pub fn names(cli: &Cli, package: &Path) -> CommandResult {
    let registry = build_registry(cli)?;
    let package = registry.open_package_file(package)?;
    package.load()?;
    let tables = package.tables()?;

    for (index, entry) in tables.names.entries().iter().enumerate() {
        println!("{:6}  {}", index, entry.text);
    }
    eprintln!("{} names", tables.names.len());
    Ok(())
}

pub fn exports(cli: &Cli, package: &Path, json: bool) -> CommandResult {
    let registry = build_registry(cli)?;
    let package = registry.open_package_file(package)?;
    package.load()?;
    let tables = package.tables()?;

    if json {
        let mut rows = Vec::with_capacity(tables.exports.len());
        for (slot, entry) in tables.exports.iter().enumerate() {
            let index = PackageIndex::from_export(slot);
            rows.push(json!({
                "index": index.0,
                "path": package.object_path(index)?,
                "class": package.class_name_of(entry.class_index)?,
                "offset": entry.serial_offset,
                "size": entry.serial_size,
                "forced": entry.is_forced(),
            }));
        }
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for (slot, entry) in tables.exports.iter().enumerate() {
        let index = PackageIndex::from_export(slot);
        let path = package.object_path(index)?;
        let class = package.class_name_of(entry.class_index)?;
        let forced = if entry.is_forced() { " [forced]" } else { "" };
        println!(
            "{:6}  {:10} {:8} {}  {}{}",
            index.0,
            entry.serial_offset,
            entry.serial_size,
            style(&class).cyan(),
            path,
            style(forced).yellow(),
        );
    }
    eprintln!("{} exports", tables.exports.len());
    Ok(())
}

pub fn imports(cli: &Cli, package: &Path) -> CommandResult {
    let registry = build_registry(cli)?;
    let package = registry.open_package_file(package)?;
    package.load()?;
    let tables = package.tables()?;

    for (slot, entry) in tables.imports.iter().enumerate() {
        let index = PackageIndex::from_import(slot);
        let name = tables.names.resolve(entry.object_name).unwrap_or_default();
        let class = tables.names.resolve(entry.class_name).unwrap_or_default();
        let from = tables
            .names
            .resolve(entry.class_package)
            .unwrap_or_default();
        println!(
            "{:6}  {} {}  ({})",
            index.0,
            style(&class).cyan(),
            name,
            from
        );
    }
    eprintln!("{} imports", tables.imports.len());
    Ok(())
}
