use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable holding the log filter (`info`, `brandscope=debug`, ...).
pub const LOG_ENV: &str = "BRANDSCOPE_LOG";

/// Install the global subscriber: human-readable lines on stderr, filtered by
/// `BRANDSCOPE_LOG` (default `info`). A second call is a no-op.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
    let _ = Registry::default().with(filter).with(fmt_layer).try_init();
}
