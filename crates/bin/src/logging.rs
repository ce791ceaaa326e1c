//! Log setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;

/// Install a stderr subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `verbosity` (the number of `-v`
/// flags) picks the level for the secq crates.
pub(crate) fn init(verbosity: u8) {
    let default = match verbosity {
        0 => "warn,secq=info",
        1 => "warn,secq=debug,secq_cache=debug",
        _ => "info,secq=trace,secq_cache=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
}
