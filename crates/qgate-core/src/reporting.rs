//! Compliance reporting over the ledger.
//!
//! Summarises a time window of gate activity: how many change sets passed,
//! which checks fail most, how overrides are used, and how often escalation
//! SLAs were missed. A high override ratio for a check is the main
//! false-positive signal.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use qgate_ledger::{collect_entries, ComplianceLedger, EntryType, LedgerFilter};
use serde::{Deserialize, Serialize};

use crate::domain::{Category, OverallStatus, RequestStatus, RequestTier, ReviewVerdict};
use crate::error::GateResult;
use crate::overrides::OverrideSnapshot;
use crate::replay::VerdictRecord;

/// Pass rate (percent) at or above which compliance is on track.
pub const TARGET_PASS_RATE: f64 = 95.0;
/// Pass rate (percent) below which compliance is critical.
pub const CRITICAL_PASS_RATE: f64 = 85.0;

const TOP_FAILING_LIMIT: usize = 5;
const HIGH_OVERRIDE_VOLUME: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportQuery {
    pub since: DateTime<Utc>,
    /// Exclusive.
    pub until: DateTime<Utc>,
    pub check_id: Option<String>,
    pub category: Option<Category>,
}

impl ReportQuery {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            since,
            until,
            check_id: None,
            category: None,
        }
    }

    /// The `days` days up to and including `now`.
    pub fn last_days(now: DateTime<Utc>, days: i64) -> Self {
        Self::new(now - Duration::days(days), now + Duration::nanoseconds(1))
    }

    pub fn with_check(mut self, check_id: impl Into<String>) -> Self {
        self.check_id = Some(check_id.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Whether check-level statistics for `check_id` are in scope.
    /// Checks with no known category are excluded by a category filter.
    fn includes(&self, check_id: &str, category: Option<Category>) -> bool {
        if self.check_id.as_deref().is_some_and(|c| c != check_id) {
            return false;
        }
        match self.category {
            Some(wanted) => category == Some(wanted),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    OnTrack,
    BelowTarget,
    Critical,
}

impl ComplianceStatus {
    pub fn from_pass_rate(rate: f64) -> Self {
        if rate >= TARGET_PASS_RATE {
            Self::OnTrack
        } else if rate >= CRITICAL_PASS_RATE {
            Self::BelowTarget
        } else {
            Self::Critical
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            Self::OnTrack => 0,
            Self::BelowTarget => 1,
            Self::Critical => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnTrack => "on_track",
            Self::BelowTarget => "below_target",
            Self::Critical => "critical",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::OnTrack => "ON TRACK",
            Self::BelowTarget => "BELOW TARGET",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure and override counts for one check across evaluated change sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckFailures {
    pub check_id: String,
    /// Change sets on which the check failed, overridden or not.
    pub failures: usize,
    /// Of those, how many were overridden.
    pub overridden: usize,
    pub override_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub change_sets_evaluated: usize,
    pub approved: usize,
    /// Percentage of evaluated change sets whose latest verdict is approved.
    pub pass_rate: f64,
    pub status: ComplianceStatus,
    /// Most failures first.
    pub failing_checks: Vec<CheckFailures>,
    pub overrides_total: usize,
    pub overrides_by_tier: BTreeMap<String, usize>,
    pub overrides_by_check: BTreeMap<String, usize>,
    /// Escalations that expired, or were decided after their deadline.
    pub sla_breaches: usize,
}

impl ComplianceReport {
    pub fn top_failing(&self, limit: usize) -> &[CheckFailures] {
        &self.failing_checks[..self.failing_checks.len().min(limit)]
    }

    pub fn emergency_overrides(&self) -> usize {
        self.overrides_by_tier
            .get(RequestTier::Emergency.as_str())
            .copied()
            .unwrap_or(0)
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Quality Gate Compliance Report\n\n");
        out.push_str(&format!(
            "**Period:** {} to {}\n\n",
            self.since.format("%Y-%m-%d %H:%M"),
            self.until.format("%Y-%m-%d %H:%M")
        ));

        out.push_str("## Summary\n\n");
        out.push_str(&format!(
            "- **Change sets evaluated:** {}\n- **Approved:** {}\n- **Pass rate:** {:.1}%\n- **Target:** {:.0}%\n- **Status:** {}\n\n",
            self.change_sets_evaluated,
            self.approved,
            self.pass_rate,
            TARGET_PASS_RATE,
            self.status.label()
        ));

        out.push_str("## Top Failing Checks\n\n");
        let top = self.top_failing(TOP_FAILING_LIMIT);
        if top.is_empty() {
            out.push_str("*No failing checks.*\n\n");
        } else {
            out.push_str("| Check | Failures | Overridden | Override ratio |\n");
            out.push_str("|-------|----------|------------|----------------|\n");
            for c in top {
                out.push_str(&format!(
                    "| `{}` | {} | {} | {:.0}% |\n",
                    c.check_id,
                    c.failures,
                    c.overridden,
                    c.override_ratio * 100.0
                ));
            }
            out.push('\n');
        }

        out.push_str("## Overrides\n\n");
        out.push_str(&format!("- **Total:** {}\n", self.overrides_total));
        for tier in [
            RequestTier::SelfService,
            RequestTier::TechLead,
            RequestTier::SecurityTeam,
            RequestTier::Emergency,
        ] {
            out.push_str(&format!(
                "- **{}:** {}\n",
                tier,
                self.overrides_by_tier.get(tier.as_str()).copied().unwrap_or(0)
            ));
        }
        out.push_str(&format!("- **SLA breaches:** {}\n\n", self.sla_breaches));

        if !self.overrides_by_check.is_empty() {
            let mut by_check: Vec<_> = self.overrides_by_check.iter().collect();
            by_check.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            out.push_str("### Most Overridden\n\n");
            for (check, count) in by_check.into_iter().take(TOP_FAILING_LIMIT) {
                out.push_str(&format!("- **{check}**: {count} override(s)\n"));
            }
            out.push('\n');
        }

        out.push_str("## Recommendations\n\n");
        let mut recs = Vec::new();
        if self.status != ComplianceStatus::OnTrack {
            recs.push("Pass rate is below target. Review the top failing checks for patterns.".to_string());
        }
        if self.overrides_total > HIGH_OVERRIDE_VOLUME {
            recs.push(format!(
                "{} overrides in this period. Investigate false positive patterns.",
                self.overrides_total
            ));
        }
        if self.emergency_overrides() > 0 {
            recs.push(format!(
                "{} emergency override(s). Review the post-incident reports.",
                self.emergency_overrides()
            ));
        }
        if self.sla_breaches > 0 {
            recs.push(format!(
                "{} escalation(s) missed their SLA. Check approver coverage.",
                self.sla_breaches
            ));
        }
        if recs.is_empty() {
            out.push_str("*No specific recommendations.*\n");
        } else {
            for (i, rec) in recs.iter().enumerate() {
                out.push_str(&format!("{}. {rec}\n", i + 1));
            }
        }
        out
    }
}

fn breached(snapshot: &OverrideSnapshot) -> bool {
    let Some(ticket) = &snapshot.escalation else {
        return false;
    };
    match snapshot.request.status {
        RequestStatus::Expired => true,
        RequestStatus::Approved | RequestStatus::Denied => snapshot
            .request
            .resolved_at
            .is_some_and(|at| at > ticket.sla_deadline),
        RequestStatus::Pending => false,
    }
}

/// Build a compliance report for `query` from `ledger`.
///
/// Change-set totals count each change-set id once, by its latest verdict in
/// the window. The check and category filters only narrow the check-level
/// statistics.
pub async fn compliance_report(
    ledger: &dyn ComplianceLedger,
    query: &ReportQuery,
) -> GateResult<ComplianceReport> {
    let verdict_entries = collect_entries(
        ledger,
        LedgerFilter::of_types(&[EntryType::VerdictComputed]).between(query.since, query.until),
    )
    .await?;

    let mut categories: HashMap<String, Category> = HashMap::new();
    let mut latest: BTreeMap<String, ReviewVerdict> = BTreeMap::new();
    for entry in &verdict_entries {
        let record: VerdictRecord = entry.payload_as()?;
        for check in &record.checks {
            categories.insert(check.id.clone(), check.category);
        }
        latest.insert(record.verdict.change_set_id.id.clone(), record.verdict);
    }

    let change_sets_evaluated = latest.len();
    let approved = latest
        .values()
        .filter(|v| v.overall_status == OverallStatus::Approved)
        .count();
    let pass_rate = if change_sets_evaluated == 0 {
        0.0
    } else {
        approved as f64 / change_sets_evaluated as f64 * 100.0
    };

    let mut failures: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for verdict in latest.values() {
        for check_id in &verdict.failed_checks {
            failures.entry(check_id.clone()).or_default().0 += 1;
        }
        for check_id in verdict.overridden_checks.keys() {
            let counts = failures.entry(check_id.clone()).or_default();
            counts.0 += 1;
            counts.1 += 1;
        }
    }
    let mut failing_checks: Vec<CheckFailures> = failures
        .into_iter()
        .filter(|(id, _)| query.includes(id, categories.get(id).copied()))
        .map(|(check_id, (failures, overridden))| CheckFailures {
            check_id,
            failures,
            overridden,
            override_ratio: overridden as f64 / failures as f64,
        })
        .collect();
    failing_checks.sort_by(|a, b| {
        b.failures
            .cmp(&a.failures)
            .then_with(|| a.check_id.cmp(&b.check_id))
    });

    let override_entries = collect_entries(
        ledger,
        LedgerFilter::of_types(&[
            EntryType::OverrideApproved,
            EntryType::OverrideDenied,
            EntryType::OverrideExpired,
        ])
        .between(query.since, query.until),
    )
    .await?;

    let mut overrides_by_tier: BTreeMap<String, usize> = BTreeMap::new();
    let mut overrides_by_check: BTreeMap<String, usize> = BTreeMap::new();
    let mut overrides_total = 0;
    let mut sla_breaches = 0;
    for entry in &override_entries {
        let snapshot: OverrideSnapshot = entry.payload_as()?;
        let check_id = &snapshot.request.check_id;
        if !query.includes(check_id, categories.get(check_id).copied()) {
            continue;
        }
        if breached(&snapshot) {
            sla_breaches += 1;
        }
        if entry.entry_type == EntryType::OverrideApproved {
            overrides_total += 1;
            *overrides_by_tier
                .entry(snapshot.request.requested_tier.as_str().to_string())
                .or_default() += 1;
            *overrides_by_check.entry(check_id.clone()).or_default() += 1;
        }
    }

    Ok(ComplianceReport {
        since: query.since,
        until: query.until,
        change_sets_evaluated,
        approved,
        pass_rate,
        status: ComplianceStatus::from_pass_rate(pass_rate),
        failing_checks,
        overrides_total,
        overrides_by_tier,
        overrides_by_check,
        sla_breaches,
    })
}
