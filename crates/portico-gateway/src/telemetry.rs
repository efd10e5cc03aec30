//! Logging setup
//!
//! Gateway logs are keyed on `connection_id` and peer fields; the HTTP
//! stack underneath the backend client is quieted to warn so protocol
//! traces stay readable at debug. `PORTICO_LOG_FORMAT=json` switches to
//! flattened JSON events for log shippers.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber
pub fn init(log_level: &str) {
    let directives = format!("{log_level},hyper=warn,reqwest=warn,h2=warn");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    let json = std::env::var("PORTICO_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false),
            )
            .init();
    }
}
