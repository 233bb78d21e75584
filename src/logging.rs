//! Process-wide tracing subscriber.

use tracing_subscriber::EnvFilter;

use crate::config::ApplicationConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Calling this twice is harmless;
/// the second install is ignored.
pub fn init(config: &ApplicationConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if config.log_format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}
