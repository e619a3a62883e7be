//! Log subscriber setup.

use tracing_subscriber::EnvFilter;

use fleet_core::config::LogFormat;

/// Used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,fleetd=debug,fleet=debug";

pub fn init(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
