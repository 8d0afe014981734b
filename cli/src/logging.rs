//! Logging bootstrap: the configured log level becomes the default filter,
//! overridable through `RUST_LOG`.

use signctrl_config::LogLevel;
use tracing_subscriber::EnvFilter;

pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
