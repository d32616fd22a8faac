//! GpkForge CLI - command-line interface
//!
//! Thin shell over the `gpkforge` library: inspect package summaries and
//! tables, extract composite packages, rewrite packages, and manage the
//! directory cache. All format logic lives in the library.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::style;

#[derive(Parser)]
#[command(name = "gpkforge", version, about = "Game asset package toolkit")]
pub struct Cli {
    /// Path to the engine config file (defaults to the platform location).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured content root.
    #[arg(long, global = true)]
    content_root: Option<PathBuf>,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show a package's summary.
    Info {
        /// Package file to inspect.
        package: PathBuf,
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// List a package's name table.
    Names {
        package: PathBuf,
    },
    /// List a package's export table.
    Exports {
        package: PathBuf,
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// List a package's import table.
    Imports {
        package: PathBuf,
    },
    /// Extract a composite package into a standalone file.
    Extract {
        /// Virtual package name (or full object path) to extract.
        name: String,
        /// Output file for the extracted package.
        output: PathBuf,
        /// Obfuscated composite mapper file.
        #[arg(long)]
        mapper: PathBuf,
    },
    /// Re-serialize a package, optionally changing compression.
    Resave {
        package: PathBuf,
        output: PathBuf,
        /// Compress the output payload.
        #[arg(long, conflicts_with = "uncompressed")]
        compress: bool,
        /// Store the output uncompressed.
        #[arg(long)]
        uncompressed: bool,
        /// Keep unchanged exports' offsets stable.
        #[arg(long)]
        preserve_offsets: bool,
    },
    /// Rebuild or inspect the content directory cache.
    Dircache {
        /// Force a fresh content-root scan.
        #[arg(long)]
        rebuild: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.verbose {
        0 => gpkforge::logging::init(),
        1 => gpkforge::logging::init_with_filter("debug"),
        _ => gpkforge::logging::init_with_filter("trace"),
    }

    let result = match &cli.command {
        Command::Info { package, json } => commands::info::run(&cli, package, *json),
        Command::Names { package } => commands::list::names(&cli, package),
        Command::Exports { package, json } => commands::list::exports(&cli, package, *json),
        Command::Imports { package } => commands::list::imports(&cli, package),
        Command::Extract {
            name,
            output,
            mapper,
        } => commands::extract::run(&cli, name, output, mapper),
        Command::Resave {
            package,
            output,
            compress,
            uncompressed,
            preserve_offsets,
        } => commands::resave::run(
            &cli,
            package,
            output,
            commands::resave::Compression::from_flags(*compress, *uncompressed),
            *preserve_offsets,
        ),
        Command::Dircache { rebuild } => commands::dircache::run(&cli, *rebuild),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {}", style("error:").red().bold(), err);
            ExitCode::FAILURE
        }
    }
}
