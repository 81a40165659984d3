//! Structured logging setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber. `verbose` turns on per-request
/// tracing from the HTTP layer; `json_logs` switches to JSON output.
/// `RUST_LOG` overrides both defaults.
pub fn init_telemetry(verbose: bool, json_logs: bool) {
    let default_filter = if verbose {
        "info,llmock=debug,tower_http=debug"
    } else {
        "info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);

    if json_logs {
        let _ = registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init();
    } else {
        let _ = registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(false))
            .try_init();
    }
}
