//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! host's choice. The CLI calls [`init`] at startup. `RUST_LOG` overrides
//! the default `info` filter.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber with the default filter.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    init_with_filter("info");
}

/// Install the global subscriber with an explicit default filter.
pub fn init_with_filter(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        init_with_filter("debug");
    }
}
