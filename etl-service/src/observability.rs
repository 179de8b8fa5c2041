use std::net::SocketAddr;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("etl_service=info".parse().unwrap_or_else(|_| "info".parse().unwrap()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Expose operational counters on `/metrics` for Prometheus scraping.
///
/// This is the process-level instrumentation endpoint; the per-run audit
/// rows live in the warehouse and are written by the metrics recorder sink.
pub fn init_metrics_endpoint(bind_addr: &str) {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder");

    // Ignore error if the handle was already set; this should only be called once.
    let _ = PROM_HANDLE.set(handle);

    let addr: SocketAddr = bind_addr
        .parse()
        .expect("invalid metrics bind address");

    tokio::spawn(async move {
        let app = Router::new().route("/metrics", get(metrics_handler));

        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    tracing::error!(error = %e, "metrics endpoint error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to bind metrics listener");
            }
        }
    });
}

async fn metrics_handler() -> String {
    PROM_HANDLE
        .get()
        .expect("Prometheus recorder not initialized")
        .render()
}
