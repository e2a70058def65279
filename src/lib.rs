pub mod config;
pub mod error;
pub mod exposition;
pub mod forward;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod parser;
pub mod patterns;
pub mod probe;
pub mod reaper;
pub mod server;
pub mod signals;
pub mod store;
pub mod syslog;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// `RUST_LOG` overrides `default_level`. Can only be called once per process.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
