//! Logging utilities

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global logging system
///
/// `RUST_LOG` wins over `ASSISTLINE_LOG_LEVEL`; both default to `info`.
/// Output goes to stderr.
/// Calling this twice is harmless.
pub fn init_logging() {
    let level = std::env::var("ASSISTLINE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .try_init();
}
