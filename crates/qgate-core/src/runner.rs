//! Concurrent check execution.
//!
//! Every applicable check runs in its own task, bounded by a semaphore and
//! by its own timeout. A check that errors, panics or times out is recorded
//! as a conservative `fail`; it never aborts its siblings. Results are only
//! returned once every check reached a terminal state, and are discarded
//! entirely if the revision was superseded meanwhile.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::analyzer::{Analysis, ChangeSetSource, CheckPlugin};
use crate::domain::{ChangeSetId, CheckResult, CheckStatus, Finding, TIMEOUT_FINDING};
use crate::error::{GateError, GateResult};
use crate::escalation::{Clock, SystemClock};
use crate::metrics::METRICS;
use crate::obs;
use crate::revision::RevisionTracker;

/// Default per-check timeout.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum number of checks executing at once.
    pub max_concurrency: usize,
    /// Timeout for checks that do not declare their own.
    pub default_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_concurrency(),
            default_timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }
}

pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

enum Outcome {
    Finished(Analysis, Duration),
    Errored(String, Duration),
    TimedOut(Duration),
    Cancelled,
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return "task aborted".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

pub struct CheckRunner {
    config: RunnerConfig,
    revisions: Arc<RevisionTracker>,
    clock: Arc<dyn Clock>,
}

impl CheckRunner {
    pub fn new(config: RunnerConfig, revisions: Arc<RevisionTracker>) -> Self {
        Self {
            config,
            revisions,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run every plug-in against `source` and return one result per check.
    ///
    /// Starting a run makes the source's revision current, cancelling runs
    /// for older revisions of the same change set.
    ///
    /// # Errors
    ///
    /// Returns `GateError::StaleChangeSet` if a newer revision was started
    /// before this run finished; partial results are dropped.
    #[instrument(skip_all, fields(change_set = %source.id(), checks = plugins.len()))]
    pub async fn run(
        &self,
        source: Arc<dyn ChangeSetSource>,
        plugins: &[CheckPlugin],
    ) -> GateResult<Vec<CheckResult>> {
        let change_set = source.id().clone();
        let cancel = self.revisions.begin(&change_set);
        let sem = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let mut pending = FuturesUnordered::new();
        for plugin in plugins {
            let analyzer = Arc::clone(&plugin.analyzer);
            let source = Arc::clone(&source);
            let sem = Arc::clone(&sem);
            let mut cancel = cancel.clone();
            let limit = plugin
                .check
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.config.default_timeout);

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                if *cancel.borrow() {
                    return Outcome::Cancelled;
                }

                let started = Instant::now();
                let outcome = tokio::select! {
                    _ = cancelled(&mut cancel) => return Outcome::Cancelled,
                    res = tokio::time::timeout(limit, analyzer.analyze(source)) => res,
                };
                let elapsed = started.elapsed();
                match outcome {
                    Ok(Ok(analysis)) => Outcome::Finished(analysis, elapsed),
                    Ok(Err(e)) => Outcome::Errored(format!("{e:#}"), elapsed),
                    Err(_) => Outcome::TimedOut(elapsed),
                }
            });

            let check_id = plugin.check.id.clone();
            pending.push(async move { (check_id, handle.await) });
        }

        let mut results = Vec::with_capacity(plugins.len());
        let mut was_cancelled = false;

        while let Some((check_id, joined)) = pending.next().await {
            let result = match joined {
                Ok(Outcome::Cancelled) => {
                    was_cancelled = true;
                    continue;
                }
                Ok(Outcome::Finished(analysis, elapsed)) => self.record(
                    &check_id,
                    &change_set,
                    analysis.status,
                    analysis.findings,
                    elapsed,
                ),
                Ok(Outcome::Errored(cause, elapsed)) => self.record(
                    &check_id,
                    &change_set,
                    CheckStatus::Fail,
                    vec![Finding::execution_error(cause)],
                    elapsed,
                ),
                Ok(Outcome::TimedOut(elapsed)) => {
                    METRICS.inc_checks_timed_out();
                    self.record(
                        &check_id,
                        &change_set,
                        CheckStatus::Fail,
                        vec![Finding::new(TIMEOUT_FINDING)],
                        elapsed,
                    )
                }
                Err(join_err) => self.record(
                    &check_id,
                    &change_set,
                    CheckStatus::Fail,
                    vec![Finding::execution_error(panic_message(join_err))],
                    Duration::ZERO,
                ),
            };
            METRICS.inc_checks_run();
            obs::emit_check_completed(&result);
            results.push(result);
        }

        if let Err(current) = self.revisions.check_current(&change_set) {
            debug!(discarded = results.len(), "dropping results for superseded revision");
            return Err(GateError::StaleChangeSet {
                requested: change_set.to_string(),
                current: change_set.at_revision(current).to_string(),
            });
        }
        if was_cancelled {
            return Err(GateError::StaleChangeSet {
                requested: change_set.to_string(),
                current: change_set.to_string(),
            });
        }
        Ok(results)
    }

    fn record(
        &self,
        check_id: &str,
        change_set: &ChangeSetId,
        status: CheckStatus,
        findings: Vec<Finding>,
        elapsed: Duration,
    ) -> CheckResult {
        CheckResult {
            check_id: check_id.to_string(),
            change_set_id: change_set.clone(),
            status,
            findings,
            executed_at: self.clock.now(),
            duration_ms: elapsed.as_millis() as u64,
        }
    }
}
