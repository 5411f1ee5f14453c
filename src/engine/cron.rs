use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::tasks::JobFactory;
use super::EngineError;
use crate::metrics::ServerMetrics;

/// A job fired on a cron schedule instead of an engine-tick cadence.
pub struct CronJobSpec {
    pub name: String,
    pub schedule: cron::Schedule,
    pub factory: JobFactory,
}

impl std::fmt::Debug for CronJobSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronJobSpec")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl CronJobSpec {
    /// Parse the expression at registration; a malformed expression is a
    /// startup validation error.
    pub fn new(
        name: impl Into<String>,
        expression: &str,
        factory: JobFactory,
    ) -> Result<Self, EngineError> {
        let schedule =
            cron::Schedule::from_str(expression).map_err(|source| EngineError::InvalidCron {
                expression: expression.to_string(),
                source,
            })?;
        Ok(Self {
            name: name.into(),
            schedule,
            factory,
        })
    }
}

/// Run one cron job until cancellation: compute the next fire time, sleep,
/// invoke, re-schedule. Late fires are not backfilled; scheduling always
/// continues from the current wall clock.
pub(super) async fn run_cron_job(
    job: CronJobSpec,
    cancel: CancellationToken,
    metrics: Arc<ServerMetrics>,
) {
    loop {
        let Some(next) = job.schedule.upcoming(Utc).next() else {
            warn!(job = %job.name, "Cron schedule yields no future fire, stopping");
            return;
        };
        let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        debug!(job = %job.name, fired_at = %next, "Cron job fired");
        metrics.cron_fires.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        (job.factory)().await;
    }
}
