//! Rebuild evaluation state from the compliance ledger.
//!
//! The ledger is the source of truth: `check_run_completed` entries carry the
//! raw results, `verdict_computed` entries record the applicable check set,
//! and override entries carry full request snapshots. Feeding those back
//! through [`aggregate`] reproduces the live verdict without writing
//! anything.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use qgate_ledger::{collect_entries, ComplianceLedger, EntryType, LedgerFilter};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::aggregator::aggregate;
use crate::domain::{ChangeSetId, Check, CheckResult, OverrideRecord, OverrideRequest, ReviewVerdict};
use crate::error::{GateError, GateResult};
use crate::overrides::{latest_per_check, OverrideSnapshot};
use crate::registry::CheckRegistry;

const OVERRIDE_TYPES: [EntryType; 4] = [
    EntryType::OverrideRequested,
    EntryType::OverrideApproved,
    EntryType::OverrideDenied,
    EntryType::OverrideExpired,
];

/// Payload of a `verdict_computed` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictRecord {
    /// Applicable check set the verdict was computed over.
    pub checks: Vec<Check>,
    pub verdict: ReviewVerdict,
}

/// Everything needed to re-aggregate one change-set revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub checks: Vec<Check>,
    pub results: Vec<CheckResult>,
    pub verdict: ReviewVerdict,
}

fn parse_change_set(raw: Option<&str>) -> Option<ChangeSetId> {
    raw.and_then(|s| s.parse().ok())
}

/// Change-set ids with at least one recorded evaluation.
pub async fn evaluated_change_sets(ledger: &dyn ComplianceLedger) -> GateResult<BTreeSet<String>> {
    let entries = collect_entries(
        ledger,
        LedgerFilter::of_types(&[EntryType::CheckRunCompleted, EntryType::VerdictComputed]),
    )
    .await?;
    Ok(entries
        .iter()
        .filter_map(|e| parse_change_set(e.change_set_id.as_deref()))
        .map(|cs| cs.id)
        .collect())
}

/// Most recently evaluated revision of `id`.
pub async fn latest_revision(
    ledger: &dyn ComplianceLedger,
    id: &str,
) -> GateResult<Option<ChangeSetId>> {
    let entries = collect_entries(
        ledger,
        LedgerFilter::of_types(&[EntryType::CheckRunCompleted, EntryType::VerdictComputed]),
    )
    .await?;
    Ok(entries
        .iter()
        .filter_map(|e| parse_change_set(e.change_set_id.as_deref()))
        .filter(|cs| cs.id == id)
        .last())
}

/// Approved overrides recorded for exactly `change_set`.
pub async fn recorded_overrides(
    ledger: &dyn ComplianceLedger,
    change_set: &ChangeSetId,
) -> GateResult<BTreeMap<String, OverrideRecord>> {
    let entries = collect_entries(
        ledger,
        LedgerFilter::of_types(&OVERRIDE_TYPES).for_change_set(change_set.to_string()),
    )
    .await?;

    let mut latest: HashMap<Uuid, OverrideRequest> = HashMap::new();
    for entry in &entries {
        let snapshot: OverrideSnapshot = entry.payload_as()?;
        latest.insert(snapshot.request.id, snapshot.request);
    }
    Ok(latest_per_check(
        latest.values().filter_map(OverrideRecord::from_request).collect(),
    ))
}

/// Rebuild the evaluation of the latest revision of `id`, or `None` if it
/// was never evaluated.
///
/// The applicable check set comes from the newest `verdict_computed` entry;
/// without one, registry checks that have a recorded result are used.
#[instrument(skip(ledger, registry))]
pub async fn replay_evaluation(
    ledger: &dyn ComplianceLedger,
    registry: &CheckRegistry,
    id: &str,
) -> GateResult<Option<Evaluation>> {
    let Some(change_set) = latest_revision(ledger, id).await? else {
        return Ok(None);
    };

    let entries = collect_entries(
        ledger,
        LedgerFilter::of_types(&[EntryType::CheckRunCompleted, EntryType::VerdictComputed])
            .for_change_set(change_set.to_string()),
    )
    .await?;

    let mut results: Vec<CheckResult> = Vec::new();
    let mut checks: Option<Vec<Check>> = None;
    for entry in &entries {
        match entry.entry_type {
            EntryType::CheckRunCompleted => results.push(entry.payload_as()?),
            EntryType::VerdictComputed => {
                checks = Some(entry.payload_as::<VerdictRecord>()?.checks);
            }
            _ => {}
        }
    }
    let checks = checks.unwrap_or_else(|| {
        let seen: BTreeSet<&str> = results.iter().map(|r| r.check_id.as_str()).collect();
        registry
            .checks()
            .filter(|c| seen.contains(c.id.as_str()))
            .cloned()
            .collect()
    });

    let overrides = recorded_overrides(ledger, &change_set).await?;
    let verdict = aggregate(&change_set, &checks, &results, &overrides);
    debug!(
        change_set = %change_set,
        results = results.len(),
        overrides = overrides.len(),
        status = %verdict.overall_status,
        "evaluation replayed"
    );
    Ok(Some(Evaluation {
        checks,
        results,
        verdict,
    }))
}

/// Current verdict of `id` as derived from the ledger.
///
/// # Errors
///
/// `GateError::UnknownChangeSet` if `id` has no recorded evaluation.
pub async fn replay_verdict(
    ledger: &dyn ComplianceLedger,
    registry: &CheckRegistry,
    id: &str,
) -> GateResult<ReviewVerdict> {
    replay_evaluation(ledger, registry, id)
        .await?
        .map(|e| e.verdict)
        .ok_or_else(|| GateError::UnknownChangeSet(id.to_string()))
}
