//! Logging setup for Splatbox
//! Crate code logs through the `log` facade; the subscriber also receives
//! `tower-http` request traces

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `TraceLayer` emits request spans and responses at debug
const DEFAULT_FILTER: &str = "info,tower_http=debug";

/// Install the global subscriber; `RUST_LOG` overrides the default filter
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let result = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();

    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
}
