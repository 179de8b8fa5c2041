use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::quote_ident;
use crate::domain::UsageRow;

/// One row of the `logs.etl_run_metrics` audit table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub run_start: OffsetDateTime,
    pub run_end: Option<OffsetDateTime>,
    pub source_name: String,
    pub records_extracted: i64,
    pub records_loaded: i64,
    pub status: String,
    pub error_message: Option<String>,
}

/// Fetch a time-ordered load profile for a single usage point over the
/// half-open epoch-second interval `[start, end)`.
pub async fn load_profile(
    pool: &PgPool,
    schema: &str,
    usage_point: &str,
    start: i64,
    end: i64,
) -> Result<Vec<UsageRow>> {
    let sql = format!(
        r#"
        SELECT
            usage_point,
            reading_quality,
            duration,
            "start",
            value,
            tou,
            start_time,
            unit
        FROM {schema}.interval_readings
        WHERE usage_point = $1
          AND "start" >= $2
          AND "start" <  $3
        ORDER BY "start"
        "#,
        schema = quote_ident(schema),
    );

    let rows = sqlx::query_as::<_, UsageRow>(&sql)
        .bind(usage_point)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// Most recent pipeline runs from the audit log, newest first.
pub async fn recent_runs(pool: &PgPool, limit: i64) -> Result<Vec<RunRecord>> {
    let rows = sqlx::query_as::<_, RunRecord>(
        r#"
        SELECT
            run_id,
            run_start,
            run_end,
            source_name,
            records_extracted,
            records_loaded,
            status,
            error_message
        FROM logs.etl_run_metrics
        ORDER BY run_start DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
