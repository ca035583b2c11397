//! Logging bootstrap for chatsync binaries.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when it is set. Otherwise the binary itself and the engine
/// crate log at `default_level`, everything else stays at `warn`.
pub fn setup_logger(bin_name: &str, default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(bin_name, default_level)));

    // try_init: a second call (tests, embedded use) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

fn default_directive(bin_name: &str, default_level: &str) -> String {
    format!(
        "warn,{}={level},chatsync_engine={level}",
        bin_name.replace('-', "_"),
        level = default_level
    )
}
