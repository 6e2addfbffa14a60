//! The quality gate engine.
//!
//! [`QualityGate`] wires the runner, aggregator, override manager, ledger and
//! notification sink together. It owns the latest evaluation per change-set
//! id so verdicts can be recomputed whenever an override lands.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use qgate_ledger::{ComplianceLedger, EntryDraft, EntryType};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, instrument, Instrument};
use uuid::Uuid;

use crate::aggregator::aggregate;
use crate::analyzer::{ChangeSetSource, CheckPlugin};
use crate::config::GateConfig;
use crate::domain::{
    ChangeSetId, Check, CheckResult, OverallStatus, OverrideRecord, OverrideRequest,
    RequestStatus, ReviewVerdict,
};
use crate::error::{GateError, GateResult};
use crate::escalation::{Clock, EscalationScheduler, SweepReport, SystemClock};
use crate::metrics::METRICS;
use crate::notify::{deliver, NotificationEvent, NotificationKind, NotificationSink, TracingSink};
use crate::obs;
use crate::overrides::{OverrideManager, OverrideTicket, PrincipalDirectory};
use crate::registry::CheckRegistry;
use crate::replay::{evaluated_change_sets, replay_evaluation, Evaluation, VerdictRecord};
use crate::revision::RevisionTracker;
use crate::runner::CheckRunner;

pub struct QualityGateBuilder {
    registry: Arc<CheckRegistry>,
    ledger: Arc<dyn ComplianceLedger>,
    config: GateConfig,
    principals: Arc<PrincipalDirectory>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl QualityGateBuilder {
    pub fn config(mut self, config: GateConfig) -> Self {
        self.config = config;
        self
    }

    pub fn principals(mut self, principals: Arc<PrincipalDirectory>) -> Self {
        self.principals = principals;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> QualityGate {
        let revisions = Arc::new(RevisionTracker::new());
        let runner = CheckRunner::new(self.config.runner_config(), Arc::clone(&revisions))
            .with_clock(Arc::clone(&self.clock));
        let manager = OverrideManager::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.ledger),
            self.config.override_settings(),
        )
        .with_principals(self.principals)
        .with_revisions(Arc::clone(&revisions))
        .with_notifier(Arc::clone(&self.notifier))
        .with_clock(Arc::clone(&self.clock));

        QualityGate {
            registry: self.registry,
            ledger: self.ledger,
            revisions,
            runner,
            manager: Arc::new(manager),
            notifier: self.notifier,
            clock: self.clock,
            evaluations: Mutex::new(HashMap::new()),
        }
    }
}

pub struct QualityGate {
    registry: Arc<CheckRegistry>,
    ledger: Arc<dyn ComplianceLedger>,
    revisions: Arc<RevisionTracker>,
    runner: CheckRunner,
    manager: Arc<OverrideManager>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    /// Latest evaluation per change-set id.
    evaluations: Mutex<HashMap<String, Evaluation>>,
}

impl QualityGate {
    pub fn builder(
        registry: Arc<CheckRegistry>,
        ledger: Arc<dyn ComplianceLedger>,
    ) -> QualityGateBuilder {
        QualityGateBuilder {
            registry,
            ledger,
            config: GateConfig::default(),
            principals: Arc::new(PrincipalDirectory::default()),
            notifier: Arc::new(TracingSink),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    pub fn manager(&self) -> &Arc<OverrideManager> {
        &self.manager
    }

    pub fn ledger(&self) -> &Arc<dyn ComplianceLedger> {
        &self.ledger
    }

    pub fn revisions(&self) -> &Arc<RevisionTracker> {
        &self.revisions
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Run `plugins` against `source`, record every result and the verdict,
    /// and return the verdict with any approved overrides applied.
    ///
    /// Re-evaluating the same revision adds to its results; duplicates are
    /// resolved by the aggregator. Evaluating a new revision supersedes the
    /// old one and discards its state.
    pub async fn evaluate(
        &self,
        source: Arc<dyn ChangeSetSource>,
        plugins: &[CheckPlugin],
    ) -> GateResult<ReviewVerdict> {
        let change_set = source.id().clone();
        let span = obs::evaluation_span(&change_set);
        async move {
            let results = self.runner.run(source, plugins).await?;
            for result in &results {
                self.ensure_current(&change_set)?;
                self.record_result(result).await?;
            }
            let checks: Vec<Check> = plugins.iter().map(|p| p.check.clone()).collect();

            let mut evaluations = self.evaluations.lock().await;
            // A newer revision may have started while the results were written.
            self.ensure_current(&change_set)?;
            let mut merged = results;
            if let Some(prev) = evaluations.get(&change_set.id) {
                if prev.verdict.change_set_id == change_set {
                    let mut all = prev.results.clone();
                    all.extend(merged);
                    merged = all;
                }
            }
            let previous = evaluations
                .get(&change_set.id)
                .map(|e| e.verdict.overall_status);
            let verdict = self
                .settle(&change_set, &checks, &merged, previous)
                .await?;
            evaluations.insert(
                change_set.id.clone(),
                Evaluation {
                    checks,
                    results: merged,
                    verdict: verdict.clone(),
                },
            );
            Ok(verdict)
        }
        .instrument(span)
        .await
    }

    fn ensure_current(&self, change_set: &ChangeSetId) -> GateResult<()> {
        self.revisions
            .check_current(change_set)
            .map_err(|current| GateError::StaleChangeSet {
                requested: change_set.to_string(),
                current: change_set.at_revision(current).to_string(),
            })
    }

    async fn record_result(&self, result: &CheckResult) -> GateResult<()> {
        let draft = EntryDraft::new(
            EntryType::CheckRunCompleted,
            serde_json::to_value(result)?,
            result.executed_at,
        )
        .with_change_set(result.change_set_id.to_string())
        .with_check(result.check_id.clone());
        self.ledger.append(draft).await?;
        Ok(())
    }

    /// Aggregate, record the verdict and announce a status change.
    async fn settle(
        &self,
        change_set: &ChangeSetId,
        checks: &[Check],
        results: &[CheckResult],
        previous: Option<OverallStatus>,
    ) -> GateResult<ReviewVerdict> {
        let overrides = self.manager.approved_overrides(change_set).await;
        let verdict = aggregate(change_set, checks, results, &overrides);

        let record = VerdictRecord {
            checks: checks.to_vec(),
            verdict: verdict.clone(),
        };
        let draft = EntryDraft::new(
            EntryType::VerdictComputed,
            serde_json::to_value(&record)?,
            self.clock.now(),
        )
        .with_change_set(change_set.to_string());
        self.ledger.append(draft).await?;

        METRICS.inc_verdicts_computed();
        obs::emit_verdict_computed(
            change_set,
            verdict.overall_status,
            verdict.failed_checks.len(),
        );

        if previous != Some(verdict.overall_status) {
            let event = NotificationEvent::new(
                NotificationKind::VerdictChanged,
                change_set.to_string(),
                self.clock.now(),
                json!({
                    "previous": previous,
                    "current": verdict.overall_status,
                    "failed_checks": verdict.failed_checks,
                    "blocking_checks": verdict.blocking_checks,
                    "overridden_checks": verdict.overridden_checks.keys().collect::<Vec<_>>(),
                }),
            );
            deliver(self.notifier.as_ref(), event).await;
        }
        Ok(verdict)
    }

    /// Re-aggregate the stored evaluation of `change_set` after an override
    /// was approved. A no-op when that revision is no longer the latest.
    async fn reaggregate(&self, change_set: &ChangeSetId) -> GateResult<Option<ReviewVerdict>> {
        let mut evaluations = self.evaluations.lock().await;
        let Some(evaluation) = evaluations.get_mut(&change_set.id) else {
            return Ok(None);
        };
        if &evaluation.verdict.change_set_id != change_set {
            return Ok(None);
        }
        let previous = Some(evaluation.verdict.overall_status);
        let verdict = self
            .settle(change_set, &evaluation.checks, &evaluation.results, previous)
            .await?;
        evaluation.verdict = verdict.clone();
        Ok(Some(verdict))
    }

    // -----------------------------------------------------------------------
    // Overrides
    // -----------------------------------------------------------------------

    /// File an override against a check that is currently failing.
    ///
    /// Runs the manager's validation first, then rejects requests for checks
    /// that the latest verdict does not list as failing.
    #[instrument(skip_all, fields(check_id = %request.check_id, change_set = %request.change_set_id))]
    pub async fn request_override(&self, request: OverrideRequest) -> GateResult<OverrideTicket> {
        self.manager.validate(&request)?;
        {
            let evaluations = self.evaluations.lock().await;
            let verdict = evaluations
                .get(&request.change_set_id.id)
                .map(|e| &e.verdict)
                .filter(|v| v.change_set_id == request.change_set_id)
                .ok_or_else(|| GateError::UnknownChangeSet(request.change_set_id.to_string()))?;
            if !verdict.failed_checks.contains(&request.check_id) {
                return Err(GateError::CheckNotFailing {
                    check_id: request.check_id.clone(),
                    change_set: request.change_set_id.to_string(),
                });
            }
        }

        let change_set = request.change_set_id.clone();
        let ticket = self.manager.request_override(request).await?;
        if ticket.status == RequestStatus::Approved {
            self.reaggregate(&change_set).await?;
        }
        Ok(ticket)
    }

    pub async fn approve(&self, request_id: Uuid, approver: &str) -> GateResult<OverrideRecord> {
        let record = self.manager.approve(request_id, approver).await?;
        if let Some(request) = self.manager.get(request_id).await {
            self.reaggregate(&request.change_set_id).await?;
        }
        Ok(record)
    }

    /// Deny a pending request. The verdict is unchanged.
    pub async fn deny(&self, request_id: Uuid, approver: &str, reason: &str) -> GateResult<()> {
        Ok(self.manager.deny(request_id, approver, reason).await?)
    }

    /// Expire every escalation past its deadline at `now`. Verdicts are not
    /// recomputed: only approved overrides count, and an expiring request was
    /// never approved, so no verdict can change.
    pub async fn sweep_escalations(&self, now: DateTime<Utc>) -> SweepReport {
        EscalationScheduler::new(Arc::clone(&self.manager))
            .sweep(now)
            .await
    }

    /// Latest verdict for change-set `id`.
    pub async fn status(&self, id: &str) -> GateResult<ReviewVerdict> {
        self.evaluations
            .lock()
            .await
            .get(id)
            .map(|e| e.verdict.clone())
            .ok_or_else(|| GateError::UnknownChangeSet(id.to_string()))
    }

    // -----------------------------------------------------------------------
    // Replay
    // -----------------------------------------------------------------------

    /// Rebuild override state and the latest evaluation of every change set
    /// from the ledger. Marks each replayed revision as current. Writes
    /// nothing.
    pub async fn restore(&self) -> GateResult<usize> {
        let overrides = self.manager.restore().await?;
        let mut restored = HashMap::new();
        for id in evaluated_change_sets(self.ledger.as_ref()).await? {
            if let Some(evaluation) =
                replay_evaluation(self.ledger.as_ref(), &self.registry, &id).await?
            {
                let cs = &evaluation.verdict.change_set_id;
                self.revisions.supersede(&cs.id, &cs.revision);
                restored.insert(id, evaluation);
            }
        }
        let change_sets = restored.len();
        *self.evaluations.lock().await = restored;
        info!(change_sets, overrides, "gate state restored from ledger");
        Ok(change_sets)
    }
}
