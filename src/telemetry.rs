//! Log output setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a formatted subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter` (e.g. `"info"` or `"streamhook=debug"`).
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_thread_names(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_existing_subscriber() {
        init_tracing("debug");
        assert!(!init_tracing("debug"));
    }
}
