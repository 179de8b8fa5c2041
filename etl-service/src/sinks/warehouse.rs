//! Idempotent bulk-upsert loader for the Postgres warehouse.
//!
//! The statement shape is fixed (`INSERT ... VALUES ... ON CONFLICT (pk)
//! DO UPDATE SET col = EXCLUDED.col`) and everything variable in it comes
//! from a validated [`SourceConfig`]: identifiers are quoted, values are
//! bound parameters. Re-running a load with overlapping primary keys
//! refreshes only the configured update columns.

use sqlx::query_builder::Separated;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};

use espi_client::db::quote_ident;
use espi_client::domain::{CustomerInfoRow, UsageRow};

use crate::config::{Credentials, SourceConfig, WarehouseConfig};
use crate::pipeline::EtlError;

/// Rows per upsert statement. Each batch is a single statement and commits
/// atomically; batches run sequentially.
pub const BATCH_SIZE: usize = 1000;

/// A record the loader can bind into an upsert statement. Bind order must
/// match the column order in the source's configuration.
pub trait UpsertRow {
    /// Number of values [`bind`](Self::bind) pushes.
    const WIDTH: usize;
    fn bind<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>);
}

impl UpsertRow for UsageRow {
    const WIDTH: usize = 8;
    fn bind<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(&self.usage_point)
            .push_bind(&self.reading_quality)
            .push_bind(self.duration)
            .push_bind(self.start)
            .push_bind(self.value)
            .push_bind(&self.tou)
            .push_bind(&self.start_time)
            .push_bind(&self.unit);
    }
}

impl UpsertRow for CustomerInfoRow {
    const WIDTH: usize = 10;
    fn bind<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(&self.account_id)
            .push_bind(&self.account_name)
            .push_bind(&self.agreement_id)
            .push_bind(&self.agreement_name)
            .push_bind(&self.sign_date)
            .push_bind(&self.address)
            .push_bind(&self.address2)
            .push_bind(&self.city)
            .push_bind(&self.state)
            .push_bind(&self.zip);
    }
}

pub(crate) async fn connect(
    warehouse: &WarehouseConfig,
    creds: &Credentials,
) -> Result<PgConnection, EtlError> {
    let opts = creds.pg_connect_options(&warehouse.db_name);
    PgConnection::connect_with(&opts)
        .await
        .map_err(EtlError::Connection)
}

/// Upsert `rows` into the source's target table over a dedicated connection.
///
/// The target table must already exist; it is checked before any write and a
/// missing table fails the load without issuing a single INSERT. The
/// connection runs in auto-commit mode and is closed on every exit path.
/// Returns the number of affected rows.
pub async fn load<T: UpsertRow>(
    warehouse: &WarehouseConfig,
    creds: &Credentials,
    spec: &SourceConfig,
    rows: &[T],
) -> Result<u64, EtlError> {
    if spec.columns.len() != T::WIDTH {
        return Err(EtlError::load(
            &spec.name,
            format!(
                "row type binds {} values but config lists {} columns",
                T::WIDTH,
                spec.columns.len()
            ),
        ));
    }

    let mut conn = connect(warehouse, creds).await?;
    let result = load_on(&mut conn, warehouse, spec, rows).await;
    if let Err(e) = conn.close().await {
        tracing::warn!(error = %e, "error closing warehouse connection");
    }
    result
}

async fn load_on<T: UpsertRow>(
    conn: &mut PgConnection,
    warehouse: &WarehouseConfig,
    spec: &SourceConfig,
    rows: &[T],
) -> Result<u64, EtlError> {
    let exists = table_exists(conn, &warehouse.schema_name, &spec.table_name)
        .await
        .map_err(|e| EtlError::load(&spec.name, e))?;
    if !exists {
        return Err(EtlError::SchemaPrecondition {
            schema: warehouse.schema_name.clone(),
            table: spec.table_name.clone(),
        });
    }

    let mut affected = 0u64;
    for chunk in rows.chunks(BATCH_SIZE) {
        let mut builder = upsert_statement(&warehouse.schema_name, spec, chunk);
        let res = builder
            .build()
            .execute(&mut *conn)
            .await
            .map_err(|e| EtlError::load(&spec.name, e))?;
        affected += res.rows_affected();
    }

    metrics::counter!("warehouse_upserted_rows_total").increment(affected);
    tracing::info!(source = %spec.name, rows = rows.len(), affected, "loaded rows into warehouse");
    Ok(affected)
}

async fn table_exists(
    conn: &mut PgConnection,
    schema: &str,
    table: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_schema = $1 AND table_name = $2
        )",
    )
    .bind(schema)
    .bind(table)
    .fetch_one(conn)
    .await
}

fn upsert_statement<'args, T: UpsertRow>(
    schema: &str,
    spec: &SourceConfig,
    rows: &'args [T],
) -> QueryBuilder<'args, Postgres> {
    let mut builder = QueryBuilder::new("INSERT INTO ");
    builder
        .push(quote_ident(schema))
        .push(".")
        .push(quote_ident(&spec.table_name))
        .push(" (");
    push_ident_list(&mut builder, &spec.columns);
    builder.push(") ");
    builder.push_values(rows, |mut b, row| row.bind(&mut b));
    builder.push(" ON CONFLICT (");
    push_ident_list(&mut builder, &spec.prim_key);
    builder.push(") DO UPDATE SET ");
    for (i, col) in spec.update_cols.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        let quoted = quote_ident(col);
        builder.push(&quoted).push(" = EXCLUDED.").push(&quoted);
    }
    builder
}

fn push_ident_list(builder: &mut QueryBuilder<'_, Postgres>, idents: &[String]) {
    for (i, ident) in idents.iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(quote_ident(ident));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage_spec() -> SourceConfig {
        SourceConfig {
            name: "usage".to_owned(),
            feed_file: Some("data/usage.xml".into()),
            feed_url: None,
            timezone: None,
            table_name: "interval_readings".to_owned(),
            columns: [
                "usage_point",
                "reading_quality",
                "duration",
                "start",
                "value",
                "tou",
                "start_time",
                "unit",
            ]
            .map(str::to_owned)
            .to_vec(),
            prim_key: vec!["usage_point".to_owned(), "start".to_owned()],
            update_cols: vec!["value".to_owned(), "reading_quality".to_owned()],
        }
    }

    fn usage_row() -> UsageRow {
        UsageRow {
            usage_point: "9202340".to_owned(),
            reading_quality: Some("19".to_owned()),
            duration: Some(900),
            start: Some(1_700_000_000),
            value: Some(1.2),
            tou: None,
            start_time: Some("2023-11-14 14:13:20".to_owned()),
            unit: "kWh".to_owned(),
        }
    }

    #[test]
    fn upsert_statement_quotes_identifiers_and_binds_values() {
        let spec = usage_spec();
        let rows = vec![usage_row(), usage_row()];
        let sql = upsert_statement("analytics", &spec, &rows).into_sql();

        assert!(
            sql.starts_with(
                "INSERT INTO \"analytics\".\"interval_readings\" (\"usage_point\", \
                 \"reading_quality\", \"duration\", \"start\", \"value\", \"tou\", \
                 \"start_time\", \"unit\") VALUES "
            ),
            "unexpected prefix: {sql}"
        );
        assert!(sql.contains("ON CONFLICT (\"usage_point\", \"start\") DO UPDATE SET"));
        assert!(sql.contains("\"value\" = EXCLUDED.\"value\", \"reading_quality\" = EXCLUDED.\"reading_quality\""));
        // Two rows of eight bound parameters each, nothing interpolated.
        assert!(sql.contains("$1") && sql.contains("$16") && !sql.contains("$17"));
        assert!(!sql.contains("9202340"));
    }

    #[tokio::test]
    async fn column_width_mismatch_fails_before_connecting() {
        let mut spec = usage_spec();
        spec.columns.pop();
        let warehouse = WarehouseConfig {
            db_name: "kwb".to_owned(),
            schema_name: "analytics".to_owned(),
        };
        let creds = Credentials {
            user: "etl".to_owned(),
            host: "localhost".to_owned(),
            password: "secret".to_owned(),
            client_id: None,
            client_secret: None,
        };
        let err = load(&warehouse, &creds, &spec, &[usage_row()])
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Load { .. }), "got {err:?}");
    }
}
