use anyhow::{bail, Result};
use etl_service::{
    config::{AppConfig, Credentials},
    observability, pipeline,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    if let Some(metrics_cfg) = &cfg.metrics {
        observability::init_metrics_endpoint(&metrics_cfg.bind_addr);
    }
    let creds = Credentials::load(&cfg.credentials.path)?;

    let run_id = Uuid::new_v4();
    tracing::info!(%run_id, "starting Green Button ETL run");

    // Sources are isolated: each records its own audit row, and a failure in
    // one does not stop the other.
    let usage = pipeline::run_usage(&cfg, &creds, run_id).await;
    let customer = pipeline::run_customer(&cfg, &creds, run_id).await;

    let failed: Vec<&str> = [&usage, &customer]
        .into_iter()
        .filter(|m| !m.succeeded())
        .map(|m| m.source_name.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("sources failed: {}", failed.join(", "));
    }

    tracing::info!(
        usage_rows = usage.records_loaded,
        customer_rows = customer.records_loaded,
        "run complete"
    );
    Ok(())
}
