//! Result aggregation and policy evaluation.
//!
//! [`aggregate`] is a pure function of `(checks, results, overrides)`: no
//! clock, no I/O, and ordered collections throughout, so the same inputs
//! always produce a byte-identical [`ReviewVerdict`] regardless of the order
//! in which results completed.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{
    ChangeSetId, Check, CheckResult, CheckStatus, OverallStatus, OverrideRecord, ReviewVerdict,
};

/// Total order used to pick the surviving result among duplicates:
/// latest `executed_at`, then `fail` over `pass`, then a stable content
/// tie-break.
fn rank(a: &CheckResult, b: &CheckResult) -> Ordering {
    a.executed_at
        .cmp(&b.executed_at)
        .then(a.status.cmp(&b.status))
        .then(a.duration_ms.cmp(&b.duration_ms))
        .then_with(|| a.findings.cmp(&b.findings))
}

/// Compute the verdict for `change_set`.
///
/// * `checks`: the applicable check set; a check with no result counts as
///   failed.
/// * `results`: runner output; results for other change sets or unknown
///   checks are ignored with a warning, duplicates are resolved by [`rank`].
/// * `overrides`: approved overrides by check id. Overrides on
///   `cannot_override` checks are never applied.
pub fn aggregate(
    change_set: &ChangeSetId,
    checks: &[Check],
    results: &[CheckResult],
    overrides: &BTreeMap<String, OverrideRecord>,
) -> ReviewVerdict {
    let mut warnings = Vec::new();

    let mut applicable: BTreeMap<&str, &Check> = BTreeMap::new();
    for check in checks {
        if applicable.insert(check.id.as_str(), check).is_some() {
            warnings.push(format!("duplicate definition for check {}", check.id));
        }
    }

    let mut by_check: BTreeMap<&str, Vec<&CheckResult>> = BTreeMap::new();
    let mut foreign = 0usize;
    for result in results {
        if &result.change_set_id != change_set {
            foreign += 1;
            continue;
        }
        by_check.entry(result.check_id.as_str()).or_default().push(result);
    }
    if foreign > 0 {
        warnings.push(format!(
            "ignored {foreign} result(s) recorded for other change sets"
        ));
    }

    let mut winners: BTreeMap<&str, &CheckResult> = BTreeMap::new();
    for (check_id, mut candidates) in by_check {
        candidates.sort_by(|a, b| rank(a, b));
        let Some(winner) = candidates.pop() else {
            continue;
        };
        for discarded in &candidates {
            warnings.push(format!(
                "duplicate result for {check_id} discarded ({} at {})",
                discarded.status,
                discarded.executed_at.to_rfc3339()
            ));
        }
        if !applicable.contains_key(check_id) {
            warnings.push(format!("result for unknown check {check_id} ignored"));
            continue;
        }
        winners.insert(check_id, winner);
    }

    let mut failed_checks = BTreeSet::new();
    let mut blocking_checks = BTreeSet::new();
    let mut overridden_checks = BTreeMap::new();
    let mut has_blocking = false;
    let mut has_warning = false;

    for (check_id, check) in &applicable {
        let status = match winners.get(check_id) {
            Some(result) => result.status,
            None => {
                warnings.push(format!("no result recorded for {check_id}"));
                CheckStatus::Fail
            }
        };
        if status == CheckStatus::Pass {
            continue;
        }

        if let Some(record) = overrides.get(*check_id) {
            if check.cannot_override {
                warnings.push(format!(
                    "override {} for {check_id} ignored: check cannot be overridden",
                    record.request_id
                ));
            } else {
                overridden_checks.insert(check_id.to_string(), record.clone());
                continue;
            }
        }

        failed_checks.insert(check_id.to_string());
        if check.is_blocking() {
            blocking_checks.insert(check_id.to_string());
            has_blocking = true;
        } else {
            has_warning = true;
        }
    }

    for check_id in overrides.keys() {
        if !overridden_checks.contains_key(check_id) && !failed_checks.contains(check_id) {
            warnings.push(format!("override for {check_id} not applied: check is not failing"));
        }
    }

    let overall_status = if has_blocking {
        OverallStatus::Blocked
    } else if has_warning {
        OverallStatus::ChangesRequested
    } else {
        OverallStatus::Approved
    };

    ReviewVerdict {
        change_set_id: change_set.clone(),
        overall_status,
        failed_checks,
        blocking_checks,
        overridden_checks,
        warnings,
    }
}
