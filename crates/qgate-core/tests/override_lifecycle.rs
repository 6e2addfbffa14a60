//! Override lifecycle: idempotent resolution, approver authority, emergency
//! policies, SLA races, and audit-write failures.

use std::sync::Arc;

use chrono::{Duration, Utc};
use qgate_core::{
    ChangeSetId, CheckRegistry, Clock, EmergencyPolicy, ErrorKind, EscalationScheduler,
    ManualClock, OverrideError, OverrideManager, OverrideRequest, OverrideSettings, OverrideTier,
    PrincipalDirectory, RequestStatus, RequestTier,
};
use qgate_ledger::{ComplianceLedger, EntryType, FailingLedger, MemoryLedger};

const WHY: &str = "Staging soak test covered this path for a week with zero regressions.";

fn cs() -> ChangeSetId {
    ChangeSetId::new("pr-220", "f00d")
}

fn principals() -> Arc<PrincipalDirectory> {
    Arc::new(
        PrincipalDirectory::default()
            .with_principal("lead-li", OverrideTier::TechLead, false)
            .with_principal("lead-kim", OverrideTier::TechLead, false)
            .with_principal("sec-ana", OverrideTier::SecurityTeam, false)
            .with_principal("ir-sam", OverrideTier::SelfService, true),
    )
}

fn manager_with(ledger: Arc<dyn ComplianceLedger>, emergency: EmergencyPolicy) -> OverrideManager {
    OverrideManager::new(
        Arc::new(CheckRegistry::standard()),
        ledger,
        OverrideSettings {
            emergency,
            ..OverrideSettings::default()
        },
    )
    .with_principals(principals())
}

fn manager(ledger: Arc<dyn ComplianceLedger>) -> OverrideManager {
    manager_with(ledger, EmergencyPolicy::AlwaysRequireIncident)
}

fn request(check_id: &str, by: &str, tier: RequestTier) -> OverrideRequest {
    OverrideRequest::new(check_id, cs(), by, tier, WHY)
}

fn count(ledger: &MemoryLedger, entry_type: EntryType) -> usize {
    ledger
        .entries()
        .iter()
        .filter(|e| e.entry_type == entry_type)
        .count()
}

#[tokio::test]
async fn second_approve_is_already_resolved_and_writes_nothing() {
    let ledger = Arc::new(MemoryLedger::new());
    let mgr = manager(ledger.clone());
    let ticket = mgr
        .request_override(request("circular-dependency", "dev", RequestTier::TechLead))
        .await
        .unwrap();

    mgr.approve(ticket.request_id, "lead-li").await.unwrap();
    let err = mgr.approve(ticket.request_id, "lead-kim").await.unwrap_err();
    assert!(matches!(
        err,
        OverrideError::AlreadyResolved {
            status: RequestStatus::Approved,
            ..
        }
    ));
    let err = mgr
        .deny(ticket.request_id, "lead-kim", "changed my mind")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyResolved);

    assert_eq!(count(&ledger, EntryType::OverrideApproved), 1);
    assert_eq!(count(&ledger, EntryType::OverrideDenied), 0);
}

#[tokio::test]
async fn second_deny_is_already_resolved() {
    let ledger = Arc::new(MemoryLedger::new());
    let mgr = manager(ledger.clone());
    let ticket = mgr
        .request_override(request("circular-dependency", "dev", RequestTier::TechLead))
        .await
        .unwrap();

    mgr.deny(ticket.request_id, "lead-li", "fix the cycle instead")
        .await
        .unwrap();
    let err = mgr
        .deny(ticket.request_id, "lead-li", "fix the cycle instead")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyResolved);
    assert_eq!(count(&ledger, EntryType::OverrideDenied), 1);
}

#[tokio::test]
async fn concurrent_approvals_resolve_exactly_once() {
    let ledger = Arc::new(MemoryLedger::new());
    let mgr = Arc::new(manager(ledger.clone()));
    let ticket = mgr
        .request_override(request("circular-dependency", "dev", RequestTier::TechLead))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for approver in ["lead-li", "lead-kim", "sec-ana", "lead-li"] {
        let mgr = Arc::clone(&mgr);
        let id = ticket.request_id;
        handles.push(tokio::spawn(async move { mgr.approve(id, approver).await }));
    }
    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::AlreadyResolved),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(count(&ledger, EntryType::OverrideApproved), 1);
}

#[tokio::test]
async fn decision_after_sla_deadline_expires_the_request() {
    let ledger = Arc::new(MemoryLedger::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let mgr = Arc::new(manager(ledger.clone()).with_clock(clock.clone()));
    let late_approve = mgr
        .request_override(request("circular-dependency", "dev", RequestTier::TechLead))
        .await
        .unwrap();
    let late_deny = mgr
        .request_override(request("n-plus-one-queries", "dev", RequestTier::TechLead))
        .await
        .unwrap();

    clock.advance(Duration::hours(30));
    let err = mgr.approve(late_approve.request_id, "lead-li").await.unwrap_err();
    assert!(matches!(
        err,
        OverrideError::AlreadyResolved {
            status: RequestStatus::Expired,
            ..
        }
    ));
    let err = mgr
        .deny(late_deny.request_id, "lead-li", "too late to matter")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyResolved);

    // Nothing left for the sweeper, and each request expired exactly once.
    let report = EscalationScheduler::new(Arc::clone(&mgr))
        .sweep(clock.now())
        .await;
    assert_eq!(report.examined, 0);
    assert!(report.expired.is_empty());
    assert_eq!(count(&ledger, EntryType::OverrideExpired), 2);
    assert_eq!(count(&ledger, EntryType::OverrideApproved), 0);
    assert_eq!(count(&ledger, EntryType::OverrideDenied), 0);
    assert!(mgr.approved_overrides(&cs()).await.is_empty());
}

#[tokio::test]
async fn sweep_and_approval_race_resolves_exactly_once() {
    let ledger = Arc::new(MemoryLedger::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let mgr = Arc::new(manager(ledger.clone()).with_clock(clock.clone()));

    let mut tickets = Vec::new();
    for _ in 0..16 {
        let ticket = mgr
            .request_override(request("circular-dependency", "dev", RequestTier::TechLead))
            .await
            .unwrap();
        tickets.push(ticket);
    }
    let deadline = tickets[0].escalation.as_ref().unwrap().sla_deadline;
    // The approver still acts inside the window; the sweeper already sees it as lapsed.
    clock.set(deadline - Duration::minutes(1));

    let scheduler = EscalationScheduler::new(Arc::clone(&mgr));
    let sweep = tokio::spawn(async move { scheduler.sweep(deadline).await });
    let mut approvals = Vec::new();
    for ticket in &tickets {
        let mgr = Arc::clone(&mgr);
        let id = ticket.request_id;
        approvals.push(tokio::spawn(async move { mgr.approve(id, "lead-li").await }));
    }

    let mut approved = 0;
    for handle in approvals {
        match handle.await.unwrap() {
            Ok(_) => approved += 1,
            Err(e) => assert!(matches!(
                e,
                OverrideError::AlreadyResolved {
                    status: RequestStatus::Expired,
                    ..
                }
            )),
        }
    }
    let report = sweep.await.unwrap();

    assert_eq!(report.expired.len() + approved, tickets.len());
    assert_eq!(report.lost_races + report.expired.len(), report.examined);
    assert!(report.failed.is_empty());
    assert_eq!(count(&ledger, EntryType::OverrideExpired), report.expired.len());
    assert_eq!(count(&ledger, EntryType::OverrideApproved), approved);
    for ticket in &tickets {
        let status = mgr.get(ticket.request_id).await.unwrap().status;
        assert!(matches!(status, RequestStatus::Approved | RequestStatus::Expired));
    }
}

#[tokio::test]
async fn approver_authority_is_enforced() {
    let mgr = manager(Arc::new(MemoryLedger::new()));
    let ticket = mgr
        .request_override(request("hardcoded-credentials", "dev", RequestTier::SecurityTeam))
        .await
        .unwrap();

    let err = mgr.approve(ticket.request_id, "lead-li").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientTier);
    let err = mgr.approve(ticket.request_id, "dev").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SelfApproval);

    mgr.approve(ticket.request_id, "sec-ana").await.unwrap();
}

#[tokio::test]
async fn requested_tier_below_check_tier_is_rejected() {
    let mgr = manager(Arc::new(MemoryLedger::new()));
    let err = mgr
        .request_override(request("sql-injection", "lead-li", RequestTier::TechLead))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientTier);

    let err = mgr
        .request_override(request("no-such-check", "dev", RequestTier::TechLead))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownCheck);
}

#[tokio::test]
async fn weak_justification_is_rejected() {
    let mgr = manager(Arc::new(MemoryLedger::new()));
    let padding = "x".repeat(120);
    for text in ["", "   ", "needed for release", padding.as_str()] {
        let req = OverrideRequest::new("memory-leak", cs(), "dev", RequestTier::SelfService, text);
        let err = mgr.request_override(req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidJustification, "{text:?}");
    }
}

#[tokio::test]
async fn emergency_always_requires_incident_by_default() {
    let ledger = Arc::new(MemoryLedger::new());
    let mgr = manager(ledger.clone());

    // Even a security-team principal needs an incident for emergency.
    let err = mgr
        .request_override(request("sql-injection", "sec-ana", RequestTier::Emergency))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingIncidentReference);

    let ticket = mgr
        .request_override(
            request("sql-injection", "dev", RequestTier::Emergency).with_ticket("INC-7781"),
        )
        .await
        .unwrap();
    let escalation = ticket.escalation.unwrap();
    assert_eq!(
        escalation.notified_channels,
        vec!["incident-response".to_string(), "security-team".to_string()]
    );

    let err = mgr.approve(ticket.request_id, "sec-ana").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientTier);
    let record = mgr.approve(ticket.request_id, "ir-sam").await.unwrap();
    assert_eq!(record.tier, RequestTier::Emergency);
    assert_eq!(record.ticket_reference.as_deref(), Some("INC-7781"));
}

#[tokio::test]
async fn emergency_incident_only_required_when_escalating_under_relaxed_policy() {
    let mgr = manager_with(
        Arc::new(MemoryLedger::new()),
        EmergencyPolicy::RequireIncidentWhenEscalating,
    );

    // Holder of the check's tier may skip the incident reference.
    let ticket = mgr
        .request_override(request("sql-injection", "sec-ana", RequestTier::Emergency))
        .await
        .unwrap();
    assert_eq!(ticket.status, RequestStatus::Pending);

    // Someone below the check's tier still needs one.
    let err = mgr
        .request_override(request("sql-injection", "lead-li", RequestTier::Emergency))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingIncidentReference);

    let blank = request("sql-injection", "lead-li", RequestTier::Emergency).with_ticket("  ");
    assert_eq!(
        mgr.request_override(blank).await.unwrap_err().kind(),
        ErrorKind::MissingIncidentReference
    );
}

#[tokio::test]
async fn failed_audit_write_leaves_request_unapproved() {
    let ledger = Arc::new(FailingLedger::new());
    let mgr = manager(ledger.clone());
    let ticket = mgr
        .request_override(request("circular-dependency", "dev", RequestTier::TechLead))
        .await
        .unwrap();

    ledger.set_failing(true);
    let err = mgr.approve(ticket.request_id, "lead-li").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LedgerWriteFailure);
    assert_eq!(
        mgr.get(ticket.request_id).await.unwrap().status,
        RequestStatus::Pending
    );
    assert!(mgr.approved_overrides(&cs()).await.is_empty());
    assert_eq!(mgr.open_tickets().await.len(), 1);

    // A failed self-service write leaves no trace at all.
    let err = mgr
        .request_override(request("memory-leak", "dev", RequestTier::SelfService))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LedgerWriteFailure);
    assert!(mgr.approved_overrides(&cs()).await.is_empty());

    ledger.set_failing(false);
    mgr.approve(ticket.request_id, "lead-li").await.unwrap();
    assert_eq!(ledger.entries().len(), 2);
}

#[tokio::test]
async fn unknown_request_and_blank_deny_reason() {
    let mgr = manager(Arc::new(MemoryLedger::new()));
    let err = mgr.approve(uuid::Uuid::new_v4(), "lead-li").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownRequest);

    let ticket = mgr
        .request_override(request("circular-dependency", "dev", RequestTier::TechLead))
        .await
        .unwrap();
    let err = mgr.deny(ticket.request_id, "lead-li", "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidJustification);
}
