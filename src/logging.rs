use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LogFormat;

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable. `RUST_LOG` overrides the default level.
pub fn init_logging(format: LogFormat, verbose: bool) {
    let default_level = if verbose { "pockets=debug" } else { "pockets=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(true) // Keep target in JSON for structured queries
                .with_writer(std::io::stderr);
            let _ = registry.with(layer).try_init();
        }
        LogFormat::Text => {
            let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
            let _ = registry.with(layer).try_init();
        }
    }
}
