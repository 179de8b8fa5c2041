use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    pub db_name: String,
    pub schema_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    pub path: PathBuf,
}

/// Opaque credential bundle consumed by the connection-establishing step and
/// (for API-backed sources) the token fetch. Loaded from a separate file
/// referenced by the main config.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub host: String,
    pub password: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl Credentials {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading credentials file {}", path.display()))?;
        let creds: Credentials = toml::from_str(&contents)?;
        Ok(creds)
    }

    pub fn api_credentials(&self) -> Option<(&str, &str)> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }

    pub fn pg_connect_options(&self, db_name: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.user)
            .password(&self.password)
            .database(db_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub token_url: String,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

/// Declarative load target for one source: where the feed comes from, which
/// table it lands in, the ordered destination columns, the conflict key, and
/// the columns refreshed on conflict.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub feed_file: Option<PathBuf>,
    pub feed_url: Option<String>,
    pub timezone: Option<chrono_tz::Tz>,
    pub table_name: String,
    pub columns: Vec<String>,
    pub prim_key: Vec<String>,
    pub update_cols: Vec<String>,
}

impl SourceConfig {
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.unwrap_or(chrono_tz::America::Los_Angeles)
    }

    /// Reject malformed load specs at startup so the SQL builder can assume
    /// well-formed input.
    fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            bail!("source name must not be empty");
        }
        if self.table_name.is_empty() {
            bail!("[{}] table_name must not be empty", self.name);
        }
        if self.columns.is_empty() {
            bail!("[{}] columns must not be empty", self.name);
        }
        if self.prim_key.is_empty() {
            bail!("[{}] prim_key must not be empty", self.name);
        }
        if self.update_cols.is_empty() {
            bail!("[{}] update_cols must not be empty", self.name);
        }
        for col in self.prim_key.iter().chain(&self.update_cols) {
            if !self.columns.contains(col) {
                bail!(
                    "[{}] column '{col}' is not in the destination column list",
                    self.name
                );
            }
        }
        if self.feed_file.is_none() && self.feed_url.is_none() {
            bail!("[{}] needs feed_file or feed_url", self.name);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub warehouse: WarehouseConfig,
    pub credentials: CredentialsConfig,
    pub api: Option<ApiConfig>,
    pub metrics: Option<MetricsConfig>,
    pub usage: SourceConfig,
    pub customer: SourceConfig,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("ETL_CONFIG").unwrap_or_else(|_| "etl-config.toml".to_string());
        let contents =
            fs::read_to_string(&path).with_context(|| format!("reading config file {path}"))?;
        let cfg: AppConfig = toml::from_str(&contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for spec in [&self.usage, &self.customer] {
            spec.validate()?;
            if spec.feed_url.is_some() && self.api.is_none() {
                bail!("[{}] feed_url requires an [api] section", spec.name);
            }
        }
        Ok(())
    }
}
