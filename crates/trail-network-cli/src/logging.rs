use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Default filter when `RUST_LOG` is unset
fn default_directives(verbose: u8) -> &'static str {
    match verbose {
        0 if cfg!(debug_assertions) => "info,trail_network_lib=debug",
        0 => "info",
        1 => "info,trail_network_lib=debug,trail_network=debug",
        _ => "debug,trail_network_lib=trace",
    }
}

/// Initialize logging to stderr, honoring `RUST_LOG` when set
pub fn setup_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);
    let registry = tracing_subscriber::registry().with(fmt_layer);
    registry.init();

    tracing::debug!("Logging initialized");
}
