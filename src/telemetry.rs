//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "mandate_desk=info,mandate_server=info,tower_http=info";

/// Install the global fmt subscriber. `RUST_LOG` overrides the default filter.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
