//! Property tests for the verdict invariant, aggregation determinism and
//! override tier monotonicity.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use qgate_core::{
    aggregate, Category, ChangeSetId, Check, CheckResult, EnforcementMode, ErrorKind, Finding,
    OverallStatus, OverrideManager, OverrideRecord, OverrideRequest, OverrideSettings,
    OverrideTier, PrincipalDirectory, RequestTier, Severity,
};
use qgate_core::CheckRegistry;
use qgate_ledger::MemoryLedger;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Pass,
    Fail,
    Missing,
}

#[derive(Debug, Clone)]
struct Case {
    mode: EnforcementMode,
    locked: bool,
    outcome: Outcome,
    overridden: bool,
}

fn case() -> impl Strategy<Value = Case> {
    (
        prop_oneof![Just(EnforcementMode::Warning), Just(EnforcementMode::Error)],
        any::<bool>(),
        prop_oneof![Just(Outcome::Pass), Just(Outcome::Fail), Just(Outcome::Missing)],
        any::<bool>(),
    )
        .prop_map(|(mode, locked, outcome, overridden)| Case {
            mode,
            locked,
            outcome,
            overridden,
        })
}

fn cs() -> ChangeSetId {
    ChangeSetId::new("pr-prop", "r1")
}

fn build(cases: &[Case]) -> (Vec<Check>, Vec<CheckResult>, BTreeMap<String, OverrideRecord>) {
    let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let mut checks = Vec::new();
    let mut results = Vec::new();
    let mut overrides = BTreeMap::new();
    for (i, c) in cases.iter().enumerate() {
        let id = format!("check-{i}");
        let mut check = Check::new(
            id.clone(),
            Category::Testing,
            Severity::Medium,
            c.mode,
            OverrideTier::TechLead,
        );
        if c.locked {
            check = check.locked();
        }
        checks.push(check);

        let at = t0 + Duration::seconds(i as i64);
        match c.outcome {
            Outcome::Pass => results.push(CheckResult::pass(id.clone(), cs(), at)),
            Outcome::Fail => results.push(CheckResult::fail(
                id.clone(),
                cs(),
                vec![Finding::new("violation")],
                at,
            )),
            Outcome::Missing => {}
        }
        if c.overridden {
            overrides.insert(
                id.clone(),
                OverrideRecord {
                    request_id: Uuid::from_u128(i as u128),
                    check_id: id,
                    tier: RequestTier::TechLead,
                    requested_by: "dev".into(),
                    approved_by: "lead".into(),
                    approved_at: t0,
                    justification: "reviewed".into(),
                    ticket_reference: None,
                },
            );
        }
    }
    (checks, results, overrides)
}

fn unresolved(c: &Case) -> bool {
    c.outcome != Outcome::Pass && !(c.overridden && !c.locked)
}

proptest! {
    #[test]
    fn merge_allowed_iff_no_unresolved_error_failure(cases in prop::collection::vec(case(), 1..12)) {
        let (checks, results, overrides) = build(&cases);
        let verdict = aggregate(&cs(), &checks, &results, &overrides);

        let blocking = cases
            .iter()
            .any(|c| c.mode == EnforcementMode::Error && unresolved(c));
        let any_unresolved = cases.iter().any(unresolved);

        prop_assert_eq!(verdict.merge_allowed(), !blocking);
        prop_assert_eq!(verdict.overall_status == OverallStatus::Blocked, blocking);
        prop_assert_eq!(verdict.overall_status == OverallStatus::Approved, !any_unresolved);
        prop_assert_eq!(
            verdict.failed_checks.len(),
            cases.iter().filter(|c| unresolved(c)).count()
        );
        for id in verdict.overridden_checks.keys() {
            let i: usize = id.trim_start_matches("check-").parse().unwrap();
            prop_assert!(!cases[i].locked);
        }
    }

    #[test]
    fn aggregation_is_deterministic_under_reordering(
        cases in prop::collection::vec(case(), 1..12),
        seed in any::<u64>(),
    ) {
        let (checks, results, overrides) = build(&cases);
        let first = aggregate(&cs(), &checks, &results, &overrides);

        let mut shuffled = results.clone();
        let n = shuffled.len();
        if n > 1 {
            shuffled.rotate_left((seed as usize) % n);
            shuffled.reverse();
        }
        let mut reordered_checks = checks.clone();
        reordered_checks.reverse();
        let second = aggregate(&cs(), &reordered_checks, &shuffled, &overrides);

        prop_assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn self_service_never_resolves_tech_lead_or_higher(
        check_tier in prop_oneof![Just(OverrideTier::TechLead), Just(OverrideTier::SecurityTeam)],
        principal_tier in prop_oneof![
            Just(OverrideTier::None),
            Just(OverrideTier::SelfService),
            Just(OverrideTier::TechLead),
            Just(OverrideTier::SecurityTeam),
        ],
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let registry = CheckRegistry::new().with_check(Check::new(
            "guarded",
            Category::Security,
            Severity::High,
            EnforcementMode::Error,
            check_tier,
        ));
        let ledger = Arc::new(MemoryLedger::new());
        let manager = OverrideManager::new(
            Arc::new(registry),
            ledger.clone(),
            OverrideSettings::default(),
        )
        .with_principals(Arc::new(
            PrincipalDirectory::default().with_principal("requester", principal_tier, true),
        ));

        let request = OverrideRequest::new(
            "guarded",
            cs(),
            "requester",
            RequestTier::SelfService,
            "Verified by hand against staging data, the finding is a false positive.",
        );
        let outcome = rt.block_on(manager.request_override(request));
        let err = outcome.unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::InsufficientTier);
        prop_assert!(ledger.is_empty());
        prop_assert!(rt.block_on(manager.approved_overrides(&cs())).is_empty());
    }
}
