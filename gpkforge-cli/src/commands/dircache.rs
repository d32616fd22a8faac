//! `gpkforge dircache` - directory cache maintenance.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use super::{build_registry, CommandResult};
use crate::Cli;

pub fn run(cli: &Cli, rebuild: bool) -> CommandResult {
    let registry = build_registry(cli)?;

    let cache = if rebuild {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::with_template("{spinner} {msg}").expect("template"));
        spinner.set_message(format!(
            "scanning {}",
            registry.config().content_root.display()
        ));
        spinner.enable_steady_tick(Duration::from_millis(80));
        let cache = registry.refresh_dir_cache()?;
        spinner.finish_and_clear();
        cache
    } else {
        registry
            .ensure_dir_cache()
            .ok_or("content root could not be scanned")?
    };

    println!(
        "{} {} packages under {}{}",
        style("dircache").bold(),
        cache.len(),
        cache.root().display(),
        if cache.is_stale() { " (stale)" } else { "" }
    );
    Ok(())
}
