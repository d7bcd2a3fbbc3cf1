//! Log output setup for desktop binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a formatted `tracing` subscriber.
///
/// `RUST_LOG` takes precedence; `default_filter` applies when it is unset or
/// invalid. Calling this more than once keeps the first subscriber.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
