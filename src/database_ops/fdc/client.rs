use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{IngestError, IngestResult};

/// Result of asking for one page of the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum PageFetch {
    Records(Vec<Value>),
    /// Empty page: the catalog is exhausted.
    End,
    /// HTTP 429. Ends the run cleanly; the page is not retried.
    RateLimited,
}

/// Anything that can serve catalog pages by 1-based number.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, page: u32) -> IngestResult<PageFetch>;
}

/// FoodData Central client for `GET /foods/list`.
///
/// Docs: https://fdc.nal.usda.gov/api-guide
#[derive(Debug, Clone)]
pub struct FdcClient {
    base_url: String,
    api_key: String,
    page_size: u32,
    http: Client,
}

impl FdcClient {
    pub fn new(cfg: &ApiConfig) -> IngestResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("fdc-ingest/", env!("CARGO_PKG_VERSION")))
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| IngestError::config(format!("http client: {e}")))?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            page_size: cfg.page_size,
            http,
        })
    }

    pub fn list_url(&self) -> String {
        format!("{}/foods/list", self.base_url)
    }
}

#[async_trait]
impl PageSource for FdcClient {
    async fn fetch(&self, page: u32) -> IngestResult<PageFetch> {
        let resp = self
            .http
            .get(self.list_url())
            .query(&[("api_key", self.api_key.as_str())])
            .query(&[("pageSize", self.page_size), ("pageNumber", page)])
            .send()
            .await
            .map_err(|source| IngestError::Network { page, source })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(PageFetch::RateLimited);
        }
        if !status.is_success() {
            return Err(IngestError::HttpStatus { page, status });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|source| IngestError::Network { page, source })?;
        let records: Vec<Value> = serde_json::from_slice(&body)
            .map_err(|source| IngestError::Decode { page, source })?;
        debug!(page, count = records.len(), "fdc page fetched");

        if records.is_empty() {
            return Ok(PageFetch::End);
        }
        Ok(PageFetch::Records(records))
    }
}
