use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use super::client::{PageFetch, PageSource};
use super::normalize::normalize_page;
use super::writer::{write_batch, WriteCounts};
use crate::database_ops::store::CatalogStore;
use crate::error::IngestResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    #[default]
    Running,
    /// An empty page ended the sweep (or the page limit was reached).
    Done,
    /// The API answered 429. A clean stop, not a failure.
    RateLimited,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Running => "RUNNING",
            RunState::Done => "DONE",
            RunState::RateLimited => "RATE_LIMITED",
            RunState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub start_page: u32,
    /// 0 = unlimited.
    pub max_pages: u32,
    /// Fixed delay after each written page.
    pub pace: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start_page: 1,
            max_pages: 0,
            pace: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    /// Terminal once `run` returns.
    pub state: RunState,
    /// Pages that returned records.
    pub pages: u32,
    pub records_seen: u64,
    pub records_skipped: u64,
    pub no_nutrient_records: u64,
    pub counts: WriteCounts,
}

/// One sweep from `start_page` until an empty page, a 429 or the page limit.
///
/// Strictly sequential: fetch, normalize, write, pace, next page. The first
/// fatal error ends the run (`FAILED`); nothing is retried here.
pub async fn run(
    source: &dyn PageSource,
    store: &dyn CatalogStore,
    opts: &RunOptions,
) -> IngestResult<RunReport> {
    let mut report = RunReport::default();
    let mut page = opts.start_page.max(1);
    info!(
        start_page = page,
        max_pages = opts.max_pages,
        pace_ms = opts.pace.as_millis() as u64,
        store = store.backend().label(),
        "fdc run starting"
    );

    let state = loop {
        if opts.max_pages > 0 && report.pages >= opts.max_pages {
            debug!(max_pages = opts.max_pages, "max_pages reached");
            break RunState::Done;
        }

        let raw = match source.fetch(page).await? {
            PageFetch::End => break RunState::Done,
            PageFetch::RateLimited => {
                info!(page, "rate limited by API; stopping run");
                break RunState::RateLimited;
            }
            PageFetch::Records(raw) => raw,
        };

        let normalized = normalize_page(page, &raw);
        let counts = write_batch(store, &normalized.records).await?;

        report.pages += 1;
        report.records_seen += raw.len() as u64;
        report.records_skipped += normalized.skipped as u64;
        report.no_nutrient_records += normalized.no_nutrients as u64;
        report.counts += counts;
        info!(
            page,
            records = raw.len(),
            skipped = normalized.skipped,
            no_nutrients = normalized.no_nutrients,
            foods_written = counts.foods_written,
            links_written = counts.links_written,
            "page committed"
        );

        if !opts.pace.is_zero() {
            tokio::time::sleep(opts.pace).await;
        }
        page += 1;
    };

    report.state = state;
    info!(
        state = %state,
        pages = report.pages,
        records = report.records_seen,
        skipped = report.records_skipped,
        foods_written = report.counts.foods_written,
        nutrients_written = report.counts.nutrients_written,
        links_written = report.counts.links_written,
        "fdc run finished"
    );
    Ok(report)
}
