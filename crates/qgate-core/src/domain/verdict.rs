//! Aggregate review verdict.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::change_set::ChangeSetId;
use super::override_request::OverrideRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Approved,
    ChangesRequested,
    Blocked,
}

impl OverallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::ChangesRequested => "changes_requested",
            Self::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict over every applicable check of one change-set revision.
///
/// Always derived by the aggregator from `(checks, results, overrides)`;
/// carries no timestamps so equal inputs serialize identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub change_set_id: ChangeSetId,
    pub overall_status: OverallStatus,
    /// Failing checks not covered by an approved override.
    pub failed_checks: BTreeSet<String>,
    /// Subset of `failed_checks` in `error` mode.
    pub blocking_checks: BTreeSet<String>,
    pub overridden_checks: BTreeMap<String, OverrideRecord>,
    /// Non-fatal aggregation notes (discarded duplicates, ignored overrides).
    pub warnings: Vec<String>,
}

impl ReviewVerdict {
    pub fn merge_allowed(&self) -> bool {
        self.overall_status != OverallStatus::Blocked
    }

    pub fn is_overridden(&self, check_id: &str) -> bool {
        self.overridden_checks.contains_key(check_id)
    }
}
