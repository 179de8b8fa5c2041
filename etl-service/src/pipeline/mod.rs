//! Run orchestration: the error taxonomy, per-run audit metrics lifecycle,
//! and the per-source extract → project → load drivers.

use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::{AppConfig, Credentials, SourceConfig};
use crate::sinks::{metrics_log, warehouse};
use crate::sources::links::LinkIdError;
use crate::sources::{parse_customer_feed, parse_usage_feed, GreenButtonClient};
use crate::transform;

#[derive(thiserror::Error, Debug)]
pub enum EtlError {
    /// Malformed document or identifier-extraction failure; fatal for the
    /// affected feed.
    #[error("parse error: {0}")]
    Parse(String),
    /// Token or bulk-data retrieval failure; fatal for the run.
    #[error("extract error: {0}")]
    Extract(String),
    /// The target table is missing; nothing was written. Schema drift is
    /// fixed out-of-band, never by auto-creating tables here.
    #[error("target table {schema}.{table} does not exist")]
    SchemaPrecondition { schema: String, table: String },
    #[error("database connection error: {0}")]
    Connection(#[source] sqlx::Error),
    /// Failure during batch execution; no partial batch is committed.
    #[error("[{source_name}] load error: {message}")]
    Load { source_name: String, message: String },
    /// Recovered locally by the metrics recorder; never propagated.
    #[error("failed to record run metrics: {0}")]
    MetricsWrite(#[source] sqlx::Error),
}

impl EtlError {
    pub(crate) fn load(source_name: &str, cause: impl std::fmt::Display) -> Self {
        Self::Load {
            source_name: source_name.to_owned(),
            message: cause.to_string(),
        }
    }
}

impl From<LinkIdError> for EtlError {
    fn from(err: LinkIdError) -> Self {
        Self::Parse(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "success",
            Self::Failed => "failure",
        }
    }
}

/// One audit row per source per run: created at start, mutated as phases
/// complete, persisted exactly once at the end regardless of outcome.
#[derive(Debug, Clone)]
pub struct RunMetrics {
    pub run_id: Uuid,
    pub source_name: String,
    pub run_start: OffsetDateTime,
    pub run_end: Option<OffsetDateTime>,
    pub source_start: Option<OffsetDateTime>,
    pub source_end: Option<OffsetDateTime>,
    pub records_extracted: i64,
    pub records_loaded: i64,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

impl RunMetrics {
    pub fn new(run_id: Uuid, source_name: &str) -> Self {
        Self {
            run_id,
            source_name: source_name.to_owned(),
            run_start: OffsetDateTime::now_utc(),
            run_end: None,
            source_start: None,
            source_end: None,
            records_extracted: 0,
            records_loaded: 0,
            status: RunStatus::Running,
            error_message: None,
        }
    }

    pub fn complete(&mut self, outcome: &Result<(), EtlError>) {
        self.run_end = Some(OffsetDateTime::now_utc());
        match outcome {
            Ok(()) => self.status = RunStatus::Succeeded,
            Err(e) => {
                self.status = RunStatus::Failed;
                self.error_message = Some(e.to_string());
            }
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Run the interval-usage source end to end and record its audit row.
pub async fn run_usage(cfg: &AppConfig, creds: &Credentials, run_id: Uuid) -> RunMetrics {
    let mut m = RunMetrics::new(run_id, &cfg.usage.name);
    let outcome = usage_inner(cfg, creds, &mut m).await;
    if let Err(e) = &outcome {
        metrics::counter!("etl_source_failures_total").increment(1);
        tracing::error!(source = %cfg.usage.name, error = %e, "source run failed");
    }
    m.complete(&outcome);
    metrics_log::record(&cfg.warehouse, creds, &m).await;
    m
}

/// Run the customer-info source end to end and record its audit row.
pub async fn run_customer(cfg: &AppConfig, creds: &Credentials, run_id: Uuid) -> RunMetrics {
    let mut m = RunMetrics::new(run_id, &cfg.customer.name);
    let outcome = customer_inner(cfg, creds, &mut m).await;
    if let Err(e) = &outcome {
        metrics::counter!("etl_source_failures_total").increment(1);
        tracing::error!(source = %cfg.customer.name, error = %e, "source run failed");
    }
    m.complete(&outcome);
    metrics_log::record(&cfg.warehouse, creds, &m).await;
    m
}

async fn usage_inner(
    cfg: &AppConfig,
    creds: &Credentials,
    m: &mut RunMetrics,
) -> Result<(), EtlError> {
    m.source_start = Some(OffsetDateTime::now_utc());
    let xml = acquire_feed(cfg, creds, &cfg.usage).await?;
    let raw = parse_usage_feed(&xml)?;
    let rows = transform::project_usage(raw, cfg.usage.tz())?;
    m.records_extracted = rows.len() as i64;
    m.source_end = Some(OffsetDateTime::now_utc());

    warehouse::load(&cfg.warehouse, creds, &cfg.usage, &rows).await?;
    m.records_loaded = rows.len() as i64;
    Ok(())
}

async fn customer_inner(
    cfg: &AppConfig,
    creds: &Credentials,
    m: &mut RunMetrics,
) -> Result<(), EtlError> {
    m.source_start = Some(OffsetDateTime::now_utc());
    let xml = acquire_feed(cfg, creds, &cfg.customer).await?;
    let rows = parse_customer_feed(&xml)?.merge();
    m.records_extracted = rows.len() as i64;
    m.source_end = Some(OffsetDateTime::now_utc());

    warehouse::load(&cfg.warehouse, creds, &cfg.customer, &rows).await?;
    m.records_loaded = rows.len() as i64;
    Ok(())
}

/// Fetch the source's feed document: from a local file when `feed_file` is
/// set, otherwise from the Green Button API via `feed_url`.
async fn acquire_feed(
    cfg: &AppConfig,
    creds: &Credentials,
    spec: &SourceConfig,
) -> Result<String, EtlError> {
    if let Some(path) = &spec.feed_file {
        return tokio::fs::read_to_string(path).await.map_err(|e| {
            EtlError::Extract(format!("failed to read feed file {}: {e}", path.display()))
        });
    }

    let Some(url) = &spec.feed_url else {
        return Err(EtlError::Extract(format!(
            "source '{}' has neither feed_file nor feed_url",
            spec.name
        )));
    };
    let api = cfg
        .api
        .as_ref()
        .ok_or_else(|| EtlError::Extract("feed_url configured without an [api] section".into()))?;
    let (client_id, client_secret) = creds.api_credentials().ok_or_else(|| {
        EtlError::Extract("feed_url configured but credentials carry no client_id/client_secret".into())
    })?;

    let client = GreenButtonClient::new(api)?;
    let token = client.fetch_access_token(client_id, client_secret).await?;
    let path = client.download_feed(url, &token, &api.data_dir).await?;
    tokio::fs::read_to_string(&path).await.map_err(|e| {
        EtlError::Extract(format!(
            "failed to read downloaded feed {}: {e}",
            path.display()
        ))
    })
}
