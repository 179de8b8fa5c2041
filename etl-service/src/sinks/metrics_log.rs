//! Audit-log recorder: one row per source per run in `logs.etl_run_metrics`.

use sqlx::Connection;

use crate::config::{Credentials, WarehouseConfig};
use crate::pipeline::{EtlError, RunMetrics};
use crate::sinks::warehouse;

const INSERT_METRICS: &str = "\
INSERT INTO logs.etl_run_metrics \
    (run_id, run_start, run_end, source_name, \
     source_start, source_end, records_extracted, records_loaded, \
     status, error_message) \
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)";

/// Persist one run's metrics row. Failures here are logged and swallowed:
/// the audit trail must never change the outcome of the data load itself.
pub async fn record(warehouse: &WarehouseConfig, creds: &Credentials, m: &RunMetrics) {
    if let Err(e) = try_record(warehouse, creds, m).await {
        metrics::counter!("metrics_log_write_failures_total").increment(1);
        tracing::error!(
            error = %e,
            run_id = %m.run_id,
            source = %m.source_name,
            "failed to write run metrics row; continuing"
        );
    }
}

async fn try_record(
    warehouse: &WarehouseConfig,
    creds: &Credentials,
    m: &RunMetrics,
) -> Result<(), EtlError> {
    let mut conn = warehouse::connect(warehouse, creds).await?;
    let result = sqlx::query(INSERT_METRICS)
        .bind(m.run_id)
        .bind(m.run_start)
        .bind(m.run_end)
        .bind(&m.source_name)
        .bind(m.source_start)
        .bind(m.source_end)
        .bind(m.records_extracted)
        .bind(m.records_loaded)
        .bind(m.status.as_str())
        .bind(m.error_message.as_deref())
        .execute(&mut conn)
        .await
        .map(|_| ())
        .map_err(EtlError::MetricsWrite);
    if let Err(e) = conn.close().await {
        tracing::warn!(error = %e, "error closing metrics connection");
    }
    result
}
