//! End-to-end gate scenarios: evaluation, override escalation, expiry,
//! locked checks, warning-only failures and check timeouts.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use qgate_core::{
    Analysis, Analyzer, ChangeSetId, ChangeSetSource, CheckPlugin, CheckRegistry, CheckResult,
    CheckStatus, Clock, ErrorKind, Finding, InMemoryChangeSet, ManualClock, MemorySink,
    NotificationKind, OverallStatus, OverrideRequest, OverrideTier, PrincipalDirectory,
    QualityGate, RequestStatus, RequestTier,
};
use qgate_core::domain::TIMEOUT_FINDING;
use qgate_ledger::{EntryType, MemoryLedger};

/// Exactly 60 characters.
const JUSTIFICATION: &str = "Values are bound by the driver, the table name is a constant";

fn principals() -> Arc<PrincipalDirectory> {
    Arc::new(
        PrincipalDirectory::default()
            .with_principal("sec-ana", OverrideTier::SecurityTeam, false)
            .with_principal("sec-omar", OverrideTier::SecurityTeam, false)
            .with_principal("lead-li", OverrideTier::TechLead, false),
    )
}

struct Harness {
    gate: QualityGate,
    ledger: Arc<MemoryLedger>,
    clock: Arc<ManualClock>,
    sink: Arc<MemorySink>,
    registry: CheckRegistry,
}

fn harness() -> Harness {
    let ledger = Arc::new(MemoryLedger::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap(),
    ));
    let sink = Arc::new(MemorySink::new());
    let gate = QualityGate::builder(Arc::new(CheckRegistry::standard()), ledger.clone())
        .principals(principals())
        .notifier(sink.clone())
        .clock(clock.clone())
        .build();
    Harness {
        gate,
        ledger,
        clock,
        sink,
        registry: CheckRegistry::standard(),
    }
}

impl Harness {
    fn failing(&self, check_id: &str) -> CheckPlugin {
        CheckPlugin::fixed(
            self.registry.get(check_id).unwrap().clone(),
            Analysis::fail(vec![Finding::at("src/db.py", 12, "flagged")]),
        )
    }

    fn passing(&self, check_id: &str) -> CheckPlugin {
        CheckPlugin::fixed(self.registry.get(check_id).unwrap().clone(), Analysis::pass())
    }
}

fn source(cs: &ChangeSetId) -> Arc<dyn ChangeSetSource> {
    Arc::new(InMemoryChangeSet::new(cs.clone()))
}

#[tokio::test]
async fn security_override_escalates_and_unblocks_on_approval() {
    let h = harness();
    let cs = ChangeSetId::new("pr-101", "a1");
    assert_eq!(JUSTIFICATION.chars().count(), 60);

    let verdict = h
        .gate
        .evaluate(source(&cs), &[h.failing("sql-injection"), h.passing("memory-leak")])
        .await
        .unwrap();
    assert_eq!(verdict.overall_status, OverallStatus::Blocked);
    assert!(verdict.blocking_checks.contains("sql-injection"));

    let err = h
        .gate
        .request_override(OverrideRequest::new(
            "sql-injection",
            cs.clone(),
            "dev-dan",
            RequestTier::SelfService,
            JUSTIFICATION,
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientTier);

    let ticket = h
        .gate
        .request_override(OverrideRequest::new(
            "sql-injection",
            cs.clone(),
            "dev-dan",
            RequestTier::SecurityTeam,
            JUSTIFICATION,
        ))
        .await
        .unwrap();
    assert_eq!(ticket.status, RequestStatus::Pending);
    let escalation = ticket.escalation.clone().unwrap();
    assert_eq!(
        escalation.sla_deadline - escalation.opened_at,
        Duration::hours(8)
    );
    assert_eq!(escalation.notified_channels, vec!["security-team".to_string()]);
    assert_eq!(
        h.gate.status("pr-101").await.unwrap().overall_status,
        OverallStatus::Blocked
    );

    h.clock.advance(Duration::hours(2));
    let record = h.gate.approve(ticket.request_id, "sec-ana").await.unwrap();
    assert_eq!(record.approved_by, "sec-ana");

    let verdict = h.gate.status("pr-101").await.unwrap();
    assert_eq!(verdict.overall_status, OverallStatus::Approved);
    assert!(verdict.is_overridden("sql-injection"));
    assert!(verdict.failed_checks.is_empty());

    assert_eq!(h.sink.count(NotificationKind::OverrideRequested), 1);
    assert_eq!(h.sink.count(NotificationKind::OverrideApproved), 1);
    assert_eq!(h.sink.count(NotificationKind::VerdictChanged), 2);
}

#[tokio::test]
async fn unanswered_escalation_expires_and_verdict_stays_blocked() {
    let h = harness();
    let cs = ChangeSetId::new("pr-102", "b7");
    h.gate
        .evaluate(source(&cs), &[h.failing("sql-injection")])
        .await
        .unwrap();
    let ticket = h
        .gate
        .request_override(OverrideRequest::new(
            "sql-injection",
            cs.clone(),
            "dev-dan",
            RequestTier::SecurityTeam,
            JUSTIFICATION,
        ))
        .await
        .unwrap();

    h.clock.advance(Duration::hours(7) + Duration::minutes(59));
    let early = h.gate.sweep_escalations(h.clock.now()).await;
    assert_eq!(early.examined, 1);
    assert!(early.expired.is_empty());

    h.clock.advance(Duration::minutes(2));
    let report = h.gate.sweep_escalations(h.clock.now()).await;
    assert_eq!(report.expired, vec![ticket.request_id]);

    let again = h.gate.sweep_escalations(h.clock.now()).await;
    assert_eq!(again.examined, 0);
    assert!(again.expired.is_empty());

    let expired_entries = h
        .ledger
        .entries()
        .iter()
        .filter(|e| e.entry_type == EntryType::OverrideExpired)
        .count();
    assert_eq!(expired_entries, 1);

    let request = h.gate.manager().get(ticket.request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Expired);
    assert_eq!(
        h.gate.status("pr-102").await.unwrap().overall_status,
        OverallStatus::Blocked
    );

    let err = h.gate.approve(ticket.request_id, "sec-ana").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyResolved);
    assert_eq!(h.sink.count(NotificationKind::OverrideExpired), 1);
}

#[tokio::test]
async fn locked_check_cannot_be_overridden_by_anyone() {
    let h = harness();
    let cs = ChangeSetId::new("pr-103", "c3");
    let verdict = h
        .gate
        .evaluate(source(&cs), &[h.failing("breaking-api-signature")])
        .await
        .unwrap();
    assert_eq!(verdict.overall_status, OverallStatus::Blocked);

    for (who, tier) in [
        ("dev-dan", RequestTier::SelfService),
        ("lead-li", RequestTier::TechLead),
        ("sec-ana", RequestTier::SecurityTeam),
        ("sec-ana", RequestTier::Emergency),
    ] {
        let request = OverrideRequest::new(
            "breaking-api-signature",
            cs.clone(),
            who,
            tier,
            JUSTIFICATION,
        )
        .with_ticket("INC-4411");
        let err = h.gate.request_override(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CannotOverride, "{who} at {tier}");
    }

    // Justification is not even looked at.
    let err = h
        .gate
        .request_override(OverrideRequest::new(
            "breaking-api-signature",
            cs.clone(),
            "sec-ana",
            RequestTier::SecurityTeam,
            "",
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CannotOverride);

    assert_eq!(
        h.gate.status("pr-103").await.unwrap().overall_status,
        OverallStatus::Blocked
    );
    assert!(h
        .ledger
        .entries()
        .iter()
        .all(|e| !e.entry_type.is_override_transition()));
}

#[tokio::test]
async fn warning_only_failures_request_changes_without_blocking() {
    let h = harness();
    let cs = ChangeSetId::new("pr-104", "d9");
    let verdict = h
        .gate
        .evaluate(
            source(&cs),
            &[
                h.failing("memory-leak"),
                h.failing("test-quality"),
                h.passing("sql-injection"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(verdict.overall_status, OverallStatus::ChangesRequested);
    assert!(verdict.merge_allowed());
    assert!(verdict.blocking_checks.is_empty());
    assert_eq!(verdict.failed_checks.len(), 2);
}

struct Stalls;

#[async_trait]
impl Analyzer for Stalls {
    async fn analyze(&self, _: Arc<dyn ChangeSetSource>) -> anyhow::Result<Analysis> {
        tokio::time::sleep(StdDuration::from_secs(3600)).await;
        Ok(Analysis::pass())
    }
}

#[tokio::test(start_paused = true)]
async fn timed_out_check_fails_and_verdict_still_computed() {
    let ledger = Arc::new(MemoryLedger::new());
    let registry = CheckRegistry::standard();
    let gate = QualityGate::builder(Arc::new(registry.clone()), ledger.clone()).build();
    let cs = ChangeSetId::new("pr-105", "e1");

    let plugins = vec![
        CheckPlugin::new(
            registry.get("n-plus-one-queries").unwrap().clone(),
            Arc::new(Stalls),
        ),
        CheckPlugin::fixed(registry.get("memory-leak").unwrap().clone(), Analysis::pass()),
    ];
    let verdict = gate.evaluate(source(&cs), &plugins).await.unwrap();
    assert_eq!(verdict.overall_status, OverallStatus::Blocked);
    assert!(verdict.failed_checks.contains("n-plus-one-queries"));

    let results: Vec<CheckResult> = ledger
        .entries()
        .iter()
        .filter(|e| e.entry_type == EntryType::CheckRunCompleted)
        .map(|e| e.payload_as().unwrap())
        .collect();
    let stalled = results
        .iter()
        .find(|r| r.check_id == "n-plus-one-queries")
        .unwrap();
    assert_eq!(stalled.status, CheckStatus::Fail);
    assert_eq!(stalled.findings[0].message, TIMEOUT_FINDING);
    assert!(stalled.timed_out());
    assert!(stalled.duration_ms >= 300_000);
    assert!(stalled.duration_ms < 3_600_000);
}
