//! Prometheus metrics for Portico Gateway
//!
//! Connection lifecycle counters plus uptime, exposed through the admin
//! HTTP surface.

use once_cell::sync::Lazy;
use prometheus::{register_gauge, register_int_counter, register_int_gauge};
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, TextEncoder};

/// Total client connections accepted since startup
pub static CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "portico_connections_total",
        "Total client connections accepted"
    )
    .unwrap()
});

/// Currently active client connections
pub static CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "portico_connections_active",
        "Currently active client connections"
    )
    .unwrap()
});

/// Connections that ended with an error
pub static CONNECTION_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "portico_connection_errors_total",
        "Connections that terminated with an error"
    )
    .unwrap()
});

/// Seconds since the gateway started
pub static UPTIME_SECONDS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("portico_uptime_seconds", "Gateway uptime in seconds").unwrap()
});

/// Force registration of all metrics at startup
pub fn init_metrics() {
    Lazy::force(&CONNECTIONS_TOTAL);
    Lazy::force(&CONNECTIONS_ACTIVE);
    Lazy::force(&CONNECTION_ERRORS);
    Lazy::force(&UPTIME_SECONDS);
}

pub fn record_connection_opened() {
    CONNECTIONS_TOTAL.inc();
    CONNECTIONS_ACTIVE.inc();
}

pub fn record_connection_closed() {
    CONNECTIONS_ACTIVE.dec();
}

pub fn record_connection_error() {
    CONNECTION_ERRORS.inc();
}

/// Render the default registry as Prometheus text exposition
pub fn encode_metrics(uptime_seconds: u64) -> String {
    UPTIME_SECONDS.set(uptime_seconds as f64);

    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposition_contains_connection_metrics() {
        init_metrics();
        record_connection_opened();
        record_connection_closed();

        let text = encode_metrics(12);
        assert!(text.contains("portico_connections_total"));
        assert!(text.contains("portico_connections_active"));
        assert!(text.contains("portico_uptime_seconds"));
    }
}
