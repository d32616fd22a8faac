//! `gpkforge resave` - re-serialize a package.

use std::path::Path;
use std::time::Duration;

use console::style;
use gpkforge::{save_package, CompressionFlags, SaveOptions};
use indicatif::{ProgressBar, ProgressStyle};

use super::{build_registry, CommandResult};
use crate::Cli;

/// Requested output compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Keep the source setting.
    Keep,
    Zlib,
    None,
}

impl Compression {
    pub fn from_flags(compress: bool, uncompressed: bool) -> Self {
        match (compress, uncompressed) {
            (true, _) => Compression::Zlib,
            (_, true) => Compression::None,
            _ => Compression::Keep,
        }
    }
}

pub fn run(
    cli: &Cli,
    input: &Path,
    output: &Path,
    compression: Compression,
    preserve_offsets: bool,
) -> CommandResult {
    let registry = build_registry(cli)?;
    let package = registry.open_package_file(input)?;
    package.load()?;

    let target = match compression {
        Compression::Keep => package.source_compression(),
        Compression::Zlib => CompressionFlags::ZLIB,
        Compression::None => CompressionFlags::empty(),
    };
    let options = SaveOptions {
        compression: target,
        preserve_offsets,
        block_size: registry.config().block_size,
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").expect("template"));
    spinner.set_message(format!("rewriting {}", package.name()));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let bytes = save_package(&package, &options)?;
    std::fs::write(output, &bytes)?;
    spinner.finish_and_clear();

    println!(
        "{} {} -> {} ({} bytes, {})",
        style("saved").green().bold(),
        input.display(),
        output.display(),
        bytes.len(),
        if target.is_empty() {
            "uncompressed"
        } else {
            "compressed"
        }
    );
    Ok(())
}
