use std::env;

use anyhow::{bail, Result};
use espi_client::db::usage_queries;
use etl_service::{
    config::{AppConfig, Credentials},
    observability,
};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        bail!("usage: usage_report <usage_point> <start_epoch> <end_epoch>");
    }
    let usage_point = &args[1];
    let start: i64 = args[2].parse()?;
    let end: i64 = args[3].parse()?;

    let cfg = AppConfig::load()?;
    let creds = Credentials::load(&cfg.credentials.path)?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect_with(creds.pg_connect_options(&cfg.warehouse.db_name))
        .await?;

    let rows = usage_queries::load_profile(
        &pool,
        &cfg.warehouse.schema_name,
        usage_point,
        start,
        end,
    )
    .await?;

    let total: f64 = rows.iter().filter_map(|r| r.value).sum();
    for row in &rows {
        println!(
            "{}  {:>10.3} {}  quality={}",
            row.start_time.as_deref().unwrap_or("-"),
            row.value.unwrap_or(f64::NAN),
            row.unit,
            row.reading_quality.as_deref().unwrap_or("-"),
        );
    }
    tracing::info!(
        usage_point = %usage_point,
        readings = rows.len(),
        total_kwh = total,
        "usage profile"
    );

    let runs = usage_queries::recent_runs(&pool, 5).await?;
    for run in &runs {
        tracing::info!(
            run_id = %run.run_id,
            source = %run.source_name,
            status = %run.status,
            extracted = run.records_extracted,
            loaded = run.records_loaded,
            "recent run"
        );
    }
    Ok(())
}
