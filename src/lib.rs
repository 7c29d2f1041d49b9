pub mod core;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Logs go to stderr so stdout carries only reports. `RUST_LOG` overrides
/// the default level.
pub fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let default_filter =
        format!("job_matcher_desktop_lib={level},job_matcher_desktop={level},extract_harness={level}");

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .try_init();
}
