//! Tracing setup. Everything goes to stderr; stdout is the IPC channel.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "exambookd=info";

fn wants_json(format: Option<&str>) -> bool {
    format.map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false)
}

/// Installs the global subscriber. `RUST_LOG` overrides the filter and
/// `RUST_LOG_FORMAT=json` switches to JSON lines. Later calls are no-ops.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let format = std::env::var("RUST_LOG_FORMAT").ok();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);

    if wants_json(format.as_deref()) {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}
