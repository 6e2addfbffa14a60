//! Structured observability hooks for gate lifecycle events.
//!
//! This module provides:
//! - A change-set-scoped span for each evaluation (attach with
//!   `tracing::Instrument`, since evaluations cross await points)
//! - Emission functions for every state transition the engine performs
//!
//! Events are emitted at `info!` level; filter with `RUST_LOG`.

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{ChangeSetId, CheckResult, OverallStatus, RequestTier};

/// Span covering one evaluation of `change_set`.
pub fn evaluation_span(change_set: &ChangeSetId) -> tracing::Span {
    tracing::info_span!(
        "qgate.evaluate",
        change_set = %change_set.id,
        revision = %change_set.revision,
    )
}

/// Emit event: one check reached a terminal state.
pub fn emit_check_completed(result: &CheckResult) {
    info!(
        event = "check.completed",
        change_set = %result.change_set_id,
        check_id = %result.check_id,
        status = %result.status,
        findings = result.findings.len(),
        duration_ms = result.duration_ms,
    );
}

/// Emit event: a verdict was (re)computed.
pub fn emit_verdict_computed(change_set: &ChangeSetId, status: OverallStatus, failed: usize) {
    info!(
        event = "verdict.computed",
        change_set = %change_set,
        status = %status,
        failed_checks = failed,
    );
}

pub fn emit_override_requested(
    request_id: Uuid,
    check_id: &str,
    tier: RequestTier,
    requested_by: &str,
) {
    info!(
        event = "override.requested",
        request_id = %request_id,
        check_id = %check_id,
        tier = %tier,
        requested_by = %requested_by,
    );
}

pub fn emit_override_approved(request_id: Uuid, check_id: &str, approved_by: &str) {
    info!(
        event = "override.approved",
        request_id = %request_id,
        check_id = %check_id,
        approved_by = %approved_by,
    );
}

pub fn emit_override_denied(request_id: Uuid, check_id: &str, denied_by: &str) {
    info!(
        event = "override.denied",
        request_id = %request_id,
        check_id = %check_id,
        denied_by = %denied_by,
    );
}

pub fn emit_override_expired(request_id: Uuid, check_id: &str) {
    info!(event = "override.expired", request_id = %request_id, check_id = %check_id);
}

/// Emit event: one escalation sweep finished.
pub fn emit_escalation_sweep(examined: usize, expired: usize) {
    info!(event = "escalation.sweep", examined = examined, expired = expired);
}

/// Emit event: a notification could not be delivered (warning level).
pub fn emit_notification_failed(event_type: &str, error: &dyn std::fmt::Display) {
    warn!(event = "notification.failed", event_type = %event_type, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_span_create() {
        let span = evaluation_span(&ChangeSetId::new("pr-1", "abc"));
        let _entered = span.enter();
        emit_verdict_computed(&ChangeSetId::new("pr-1", "abc"), OverallStatus::Approved, 0);
    }
}
