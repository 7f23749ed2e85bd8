//! Telemetry - tracing subscriber and Prometheus exporter setup

use anyhow::{Context, Result};
use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter for a `-v` count. `RUST_LOG` overrides it.
pub fn level_for(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. Compact text by default, one JSON object
/// per line with `json`.
pub fn init_logging(verbose: u8, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbose)));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    installed.map_err(|e| anyhow::anyhow!(e)).context("Failed to install tracing subscriber")
}

/// Serve `/metrics` on `listen` and register metric descriptions.
/// Must be called inside a tokio runtime.
pub fn init_metrics(listen: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .with_context(|| format!("Failed to start metrics exporter on {listen}"))?;
    describe_metrics();
    info!("Metrics exporter listening on {}", listen);
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "astra_crack_attempts_total",
        Unit::Count,
        "Credential attempts by protocol and outcome"
    );
    describe_counter!("astra_findings_total", Unit::Count, "Port findings by route");
    describe_counter!(
        "astra_hosts_capped_total",
        Unit::Count,
        "Hosts replaced by the web-liveness fallback"
    );
}
