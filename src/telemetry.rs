use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

pub const CONNECTED_GAUGE: &str = "fxtick_connected";
pub const CONNECT_ATTEMPTS: &str = "fxtick_connect_attempts_total";
pub const RECONNECTS_SCHEDULED: &str = "fxtick_reconnects_scheduled_total";
pub const QUOTES_ACCEPTED: &str = "fxtick_quotes_total";
pub const PARSE_FAILURES: &str = "fxtick_parse_failures_total";

pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

#[cfg(feature = "metrics-exporter")]
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "prometheus exporter listening");
    metrics::gauge!("fxtick_up").set(1.0);
    Ok(())
}

#[cfg(not(feature = "metrics-exporter"))]
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    tracing::warn!(%addr, "metrics address set but built without the `metrics-exporter` feature");
    Ok(())
}
