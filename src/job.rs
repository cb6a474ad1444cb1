//! Whole-run retry policy. A failed run is started again from its first page
//! after a fixed delay, up to `retries` extra attempts. There is no per-page
//! retry anywhere.
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::JobSettings;
use crate::database_ops::fdc::{run, PageSource, RunOptions, RunReport, RunState};
use crate::database_ops::store::CatalogStore;
use crate::error::IngestError;

#[derive(Debug, Clone, Copy)]
pub struct JobPolicy {
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            retry_delay: Duration::from_secs(5 * 60),
        }
    }
}

impl From<&JobSettings> for JobPolicy {
    fn from(s: &JobSettings) -> Self {
        Self {
            retries: s.retries,
            retry_delay: s.retry_delay,
        }
    }
}

#[derive(Debug)]
pub struct JobOutcome {
    pub attempts: u32,
    pub state: RunState,
    /// Report of the final successful attempt.
    pub report: Option<RunReport>,
    /// Error of the final failed attempt.
    pub error: Option<IngestError>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.state, RunState::Done | RunState::RateLimited)
    }
}

pub async fn run_job(
    source: &dyn PageSource,
    store: &dyn CatalogStore,
    opts: &RunOptions,
    policy: JobPolicy,
) -> JobOutcome {
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match run(source, store, opts).await {
            Ok(report) => {
                info!(attempts, state = %report.state, "fdc job finished");
                return JobOutcome {
                    attempts,
                    state: report.state,
                    report: Some(report),
                    error: None,
                };
            }
            Err(err) => {
                error!(
                    attempt = attempts,
                    kind = err.kind().as_str(),
                    error = %err,
                    "fdc run FAILED"
                );
                if attempts > policy.retries {
                    return JobOutcome {
                        attempts,
                        state: RunState::Failed,
                        report: None,
                        error: Some(err),
                    };
                }
                warn!(
                    attempt = attempts,
                    retries = policy.retries,
                    delay_secs = policy.retry_delay.as_secs(),
                    "retrying whole run"
                );
                tokio::time::sleep(policy.retry_delay).await;
            }
        }
    }
}
