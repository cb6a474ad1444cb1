//! Run configuration. Built once at startup and handed to the fetcher, the
//! store and the job; nothing below this layer reads the process environment.
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{IngestError, IngestResult};
use crate::util::env::{compose_pg_dsn, env_opt, log_snapshot};

pub const DEFAULT_BASE_URL: &str = "https://api.nal.usda.gov/fdc/v1";
pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub page_size: u32,
    /// Requests per hour granted by the API key; 0 disables pacing.
    pub rate_limit_per_hour: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StoreBackend {
    Postgres,
    Sqlite,
    Memory,
}

impl StoreBackend {
    pub fn label(self) -> &'static str {
        match self {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Sqlite => "sqlite",
            StoreBackend::Memory => "memory",
        }
    }
}

impl FromStr for StoreBackend {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(StoreBackend::Postgres),
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => Err(IngestError::config(format!("unknown store backend {other:?}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    /// Postgres DSN; required only for the postgres backend.
    pub url: Option<String>,
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub start_page: u32,
    /// 0 = unlimited.
    pub max_pages: u32,
    pub retries: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct FdcConfig {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub job: JobSettings,
}

impl ApiConfig {
    pub fn from_lookup<F>(lookup: F) -> IngestResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = non_blank(lookup);
        let api_key = get("FDC_API_KEY")
            .ok_or_else(|| IngestError::config("missing env var FDC_API_KEY"))?;
        let base_url = get("FDC_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let requested_page_size: u32 = parse_or(&get, "FDC_PAGE_SIZE", 100)?;
        let page_size = requested_page_size.clamp(1, MAX_PAGE_SIZE);
        if page_size != requested_page_size {
            tracing::warn!(
                requested = requested_page_size,
                page_size,
                "FDC_PAGE_SIZE outside 1..={MAX_PAGE_SIZE}; clamped"
            );
        }
        let timeout_secs: u64 = parse_or(&get, "FDC_HTTP_TIMEOUT_SECS", 30)?;
        if timeout_secs == 0 {
            return Err(IngestError::config("FDC_HTTP_TIMEOUT_SECS must be at least 1"));
        }
        Ok(Self {
            base_url,
            api_key,
            page_size,
            rate_limit_per_hour: parse_or(&get, "FDC_RATE_LIMIT_PER_HOUR", 1000)?,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Fixed delay between pages derived from the hourly request ceiling.
    pub fn pace_interval(&self) -> Duration {
        if self.rate_limit_per_hour == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis((3_600_000u64 / u64::from(self.rate_limit_per_hour)).max(1))
    }
}

impl DatabaseConfig {
    pub fn from_env() -> IngestResult<Self> {
        Self::from_lookup(env_opt)
    }

    pub fn from_lookup<F>(lookup: F) -> IngestResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = non_blank(lookup);
        let backend = match get("FDC_STORE") {
            Some(raw) => raw.parse()?,
            None => StoreBackend::Postgres,
        };
        let url = match get("DATABASE_URL") {
            Some(url) => Some(url),
            None => {
                let port: u16 = parse_or(&get, "DB_PORT", 5432)?;
                let ssl_mode = get("DB_SSLMODE").unwrap_or_else(|| "prefer".into());
                compose_pg_dsn(
                    &get("DB_HOST").unwrap_or_default(),
                    port,
                    &get("DB_NAME").unwrap_or_default(),
                    &get("DB_USER").unwrap_or_default(),
                    get("DB_PASSWORD").as_deref(),
                    &ssl_mode,
                )
            }
        };
        Ok(Self {
            backend,
            url,
            sqlite_path: get("SQLITE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("fdc.sqlite")),
        })
    }

    pub fn postgres_url(&self) -> IngestResult<&str> {
        self.url.as_deref().ok_or_else(|| {
            IngestError::config("postgres store needs DATABASE_URL or DB_HOST/DB_NAME/DB_USER")
        })
    }
}

impl JobSettings {
    pub fn from_lookup<F>(lookup: F) -> IngestResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = non_blank(lookup);
        let start_page: u32 = parse_or(&get, "INGEST_START_PAGE", 1)?;
        if start_page == 0 {
            return Err(IngestError::config("INGEST_START_PAGE is 1-based"));
        }
        Ok(Self {
            start_page,
            max_pages: parse_or(&get, "INGEST_MAX_PAGES", 0)?,
            retries: parse_or(&get, "INGEST_RETRIES", 5)?,
            retry_delay: Duration::from_secs(parse_or(&get, "INGEST_RETRY_DELAY_SECS", 300)?),
        })
    }
}

impl FdcConfig {
    pub fn from_env() -> IngestResult<Self> {
        Self::from_lookup(env_opt)
    }

    pub fn from_lookup<F>(lookup: F) -> IngestResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            api: ApiConfig::from_lookup(&lookup)?,
            database: DatabaseConfig::from_lookup(&lookup)?,
            job: JobSettings::from_lookup(&lookup)?,
        })
    }

    /// Log the effective configuration with secrets masked.
    pub fn log_snapshot(&self) {
        log_snapshot(
            "fdc-ingest",
            &[
                ("FDC_BASE_URL", self.api.base_url.clone()),
                ("FDC_API_KEY", self.api.api_key.clone()),
                ("FDC_PAGE_SIZE", self.api.page_size.to_string()),
                ("FDC_RATE_LIMIT_PER_HOUR", self.api.rate_limit_per_hour.to_string()),
                ("FDC_STORE", self.database.backend.label().to_string()),
                ("DATABASE_URL", self.database.url.clone().unwrap_or_default()),
                ("SQLITE_PATH", self.database.sqlite_path.display().to_string()),
                ("INGEST_START_PAGE", self.job.start_page.to_string()),
                ("INGEST_MAX_PAGES", self.job.max_pages.to_string()),
                ("INGEST_RETRIES", self.job.retries.to_string()),
            ],
        );
    }
}

// Blank values count as unset.
fn non_blank<F>(lookup: F) -> impl Fn(&str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    move |key: &str| lookup(key).filter(|v| !v.trim().is_empty())
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> IngestResult<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| IngestError::config(format!("{key}={raw:?} is not a valid number"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> IngestResult<FdcConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FdcConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_follow_the_public_api() {
        let cfg = config_from(&[("FDC_API_KEY", "k")]).expect("config");
        assert_eq!(cfg.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.api.page_size, 100);
        assert_eq!(cfg.api.rate_limit_per_hour, 1000);
        assert_eq!(cfg.api.pace_interval(), Duration::from_millis(3600));
        assert_eq!(cfg.database.backend, StoreBackend::Postgres);
        assert!(cfg.database.url.is_none());
        assert_eq!(cfg.job.start_page, 1);
        assert_eq!(cfg.job.max_pages, 0);
        assert_eq!(cfg.job.retries, 5);
        assert_eq!(cfg.job.retry_delay, Duration::from_secs(300));
    }

    #[test]
    fn api_key_is_required() {
        let err = config_from(&[("FDC_API_KEY", "  ")]).unwrap_err();
        assert!(err.to_string().contains("FDC_API_KEY"));
    }

    #[test]
    fn composes_database_url_from_parts() {
        let cfg = config_from(&[
            ("FDC_API_KEY", "k"),
            ("DB_HOST", "db"),
            ("DB_NAME", "usda"),
            ("DB_USER", "loader"),
            ("DB_PASSWORD", "secret"),
            ("DB_SSLMODE", "disable"),
        ])
        .expect("config");
        assert_eq!(
            cfg.database.postgres_url().expect("url"),
            "postgresql://loader:secret@db:5432/usda"
        );
    }

    #[test]
    fn explicit_database_url_wins() {
        let cfg = config_from(&[
            ("FDC_API_KEY", "k"),
            ("DATABASE_URL", "postgres://a@b/c"),
            ("DB_HOST", "ignored"),
        ])
        .expect("config");
        assert_eq!(cfg.database.url.as_deref(), Some("postgres://a@b/c"));
    }

    #[test]
    fn page_size_is_clamped_and_bad_numbers_rejected() {
        let cfg = config_from(&[("FDC_API_KEY", "k"), ("FDC_PAGE_SIZE", "5000")]).expect("config");
        assert_eq!(cfg.api.page_size, MAX_PAGE_SIZE);

        let err = config_from(&[("FDC_API_KEY", "k"), ("INGEST_RETRIES", "many")]).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));

        let err = config_from(&[("FDC_API_KEY", "k"), ("INGEST_START_PAGE", "0")]).unwrap_err();
        assert!(err.to_string().contains("1-based"));
    }

    #[test]
    fn zero_http_timeout_is_rejected() {
        let err =
            config_from(&[("FDC_API_KEY", "k"), ("FDC_HTTP_TIMEOUT_SECS", "0")]).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
        assert!(err.to_string().contains("FDC_HTTP_TIMEOUT_SECS"));

        let cfg = config_from(&[("FDC_API_KEY", "k"), ("FDC_HTTP_TIMEOUT_SECS", "5")]).expect("config");
        assert_eq!(cfg.api.timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_rate_limit_disables_pacing_and_backend_parses() {
        let cfg = config_from(&[
            ("FDC_API_KEY", "k"),
            ("FDC_RATE_LIMIT_PER_HOUR", "0"),
            ("FDC_STORE", "SQLite"),
            ("SQLITE_PATH", "/tmp/x.db"),
        ])
        .expect("config");
        assert_eq!(cfg.api.pace_interval(), Duration::ZERO);
        assert_eq!(cfg.database.backend, StoreBackend::Sqlite);
        assert_eq!(cfg.database.sqlite_path, PathBuf::from("/tmp/x.db"));
        assert!(cfg.database.postgres_url().is_err());
        assert!("oracle".parse::<StoreBackend>().is_err());
    }
}
