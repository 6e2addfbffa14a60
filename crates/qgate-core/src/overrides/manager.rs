//! Override lifecycle state machine.
//!
//! The manager is the sole owner of [`OverrideRequest`] state. All status
//! changes go through one async mutex over the request table and are
//! compare-and-transition from `pending`: a request that is already
//! terminal is never touched again. The ledger append happens *before* the
//! in-memory commit, so a failed audit write leaves the request exactly as
//! it was.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use qgate_ledger::{
    collect_entries, ComplianceLedger, EntryDraft, EntryType, LedgerError, LedgerFilter,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

use super::error::{OverrideError, OverrideResult};
use super::justification::JustificationPolicy;
use super::principal::PrincipalDirectory;
use crate::domain::{
    channels_for, ChangeSetId, EscalationTicket, OverrideRecord, OverrideRequest, RequestStatus,
    RequestTier,
};
use crate::error::GateResult;
use crate::escalation::{Clock, SlaPolicy, SystemClock};
use crate::metrics::METRICS;
use crate::notify::{deliver, NotificationEvent, NotificationKind, NotificationSink, TracingSink};
use crate::obs;
use crate::registry::CheckRegistry;
use crate::revision::RevisionTracker;

/// Whether emergency requests must always cite an incident.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmergencyPolicy {
    /// Every emergency request needs a ticket reference.
    #[default]
    AlwaysRequireIncident,
    /// Only required when the requester's own tier is below the check's.
    RequireIncidentWhenEscalating,
}

impl std::str::FromStr for EmergencyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always-require-incident" => Ok(Self::AlwaysRequireIncident),
            "require-incident-when-escalating" => Ok(Self::RequireIncidentWhenEscalating),
            other => Err(format!("unknown emergency policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideSettings {
    pub justification: JustificationPolicy,
    pub sla: SlaPolicy,
    pub emergency: EmergencyPolicy,
}

/// What `request_override` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideTicket {
    pub request_id: Uuid,
    pub status: RequestStatus,
    /// Present for requests routed above self-service.
    pub escalation: Option<EscalationTicket>,
}

/// Ledger payload of every override transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideSnapshot {
    pub request: OverrideRequest,
    pub escalation: Option<EscalationTicket>,
}

#[derive(Debug, Default)]
struct OverrideTable {
    requests: HashMap<Uuid, OverrideRequest>,
    tickets: HashMap<Uuid, EscalationTicket>,
}

impl OverrideTable {
    fn apply(&mut self, snapshot: OverrideSnapshot) {
        let id = snapshot.request.id;
        let status = snapshot.request.status;
        self.requests.insert(id, snapshot.request);
        match snapshot.escalation {
            Some(ticket) => {
                self.tickets.insert(id, ticket);
            }
            None => {
                if let Some(ticket) = self.tickets.get_mut(&id) {
                    ticket.resolution = status.is_terminal().then_some(status);
                }
            }
        }
    }
}

/// Keep the latest approval per check; ties broken by request id.
pub(crate) fn latest_per_check(mut records: Vec<OverrideRecord>) -> BTreeMap<String, OverrideRecord> {
    records.sort_by(|a, b| {
        a.approved_at
            .cmp(&b.approved_at)
            .then(a.request_id.cmp(&b.request_id))
    });
    records
        .into_iter()
        .map(|r| (r.check_id.clone(), r))
        .collect()
}

fn approval_record(request: &OverrideRequest, approver: &str, at: DateTime<Utc>) -> OverrideRecord {
    OverrideRecord {
        request_id: request.id,
        check_id: request.check_id.clone(),
        tier: request.requested_tier,
        requested_by: request.requested_by.clone(),
        approved_by: approver.to_string(),
        approved_at: at,
        justification: request.justification.clone(),
        ticket_reference: request.ticket_reference.clone(),
    }
}

pub struct OverrideManager {
    registry: Arc<CheckRegistry>,
    ledger: Arc<dyn ComplianceLedger>,
    principals: Arc<PrincipalDirectory>,
    revisions: Arc<RevisionTracker>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    settings: OverrideSettings,
    table: Mutex<OverrideTable>,
}

impl OverrideManager {
    pub fn new(
        registry: Arc<CheckRegistry>,
        ledger: Arc<dyn ComplianceLedger>,
        settings: OverrideSettings,
    ) -> Self {
        Self {
            registry,
            ledger,
            principals: Arc::new(PrincipalDirectory::default()),
            revisions: Arc::new(RevisionTracker::new()),
            notifier: Arc::new(TracingSink),
            clock: Arc::new(SystemClock),
            settings,
            table: Mutex::new(OverrideTable::default()),
        }
    }

    pub fn with_principals(mut self, principals: Arc<PrincipalDirectory>) -> Self {
        self.principals = principals;
        self
    }

    pub fn with_revisions(mut self, revisions: Arc<RevisionTracker>) -> Self {
        self.revisions = revisions;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &OverrideSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Run every intake check on `request` without recording anything.
    ///
    /// Order: unknown check, `cannot_override`, justification, incident
    /// reference, tier, stale revision.
    pub fn validate(&self, request: &OverrideRequest) -> OverrideResult<()> {
        let check =
            self.registry
                .get(&request.check_id)
                .ok_or_else(|| OverrideError::UnknownCheck {
                    check_id: request.check_id.clone(),
                })?;
        if check.cannot_override {
            return Err(OverrideError::CannotOverride {
                check_id: check.id.clone(),
            });
        }

        self.settings.justification.validate(&request.justification)?;

        let requester = self.principals.resolve(&request.requested_by);
        let required = check.override_tier.effective();
        match request.requested_tier.standard() {
            None => {
                let needs_incident = match self.settings.emergency {
                    EmergencyPolicy::AlwaysRequireIncident => true,
                    EmergencyPolicy::RequireIncidentWhenEscalating => {
                        !requester.tier.satisfies(required)
                    }
                };
                let has_incident = request
                    .ticket_reference
                    .as_deref()
                    .is_some_and(|t| !t.trim().is_empty());
                if needs_incident && !has_incident {
                    return Err(OverrideError::MissingIncidentReference {
                        check_id: check.id.clone(),
                    });
                }
            }
            Some(tier) => {
                if !tier.satisfies(required) {
                    return Err(OverrideError::InsufficientTier {
                        principal: requester.id,
                        required: required.to_string(),
                        held: format!("{} request", request.requested_tier),
                    });
                }
                if request.requested_tier == RequestTier::SelfService
                    && !requester.tier.satisfies(required)
                {
                    return Err(OverrideError::InsufficientTier {
                        principal: requester.id,
                        required: required.to_string(),
                        held: requester.tier.to_string(),
                    });
                }
            }
        }

        self.ensure_current(&request.change_set_id)
    }

    fn ensure_current(&self, change_set: &ChangeSetId) -> OverrideResult<()> {
        self.revisions
            .check_current(change_set)
            .map_err(|current| OverrideError::StaleChangeSet {
                requested: change_set.to_string(),
                current: change_set.at_revision(current).to_string(),
            })
    }

    /// Whether `approver` may resolve `request`.
    fn authorize(&self, request: &OverrideRequest, approver: &str) -> OverrideResult<()> {
        if approver == request.requested_by {
            return Err(OverrideError::SelfApproval {
                request_id: request.id,
                principal: approver.to_string(),
            });
        }
        let principal = self.principals.resolve(approver);
        let (allowed, required) = match request.requested_tier.standard() {
            Some(tier) => (principal.tier.satisfies(tier), tier.to_string()),
            None => (
                principal.incident_responder,
                "incident-responder".to_string(),
            ),
        };
        if !allowed {
            return Err(OverrideError::InsufficientTier {
                principal: principal.id,
                required,
                held: principal.tier.to_string(),
            });
        }
        Ok(())
    }

    async fn append(
        &self,
        entry_type: EntryType,
        snapshot: &OverrideSnapshot,
        at: DateTime<Utc>,
    ) -> OverrideResult<u64> {
        let payload = serde_json::to_value(snapshot).map_err(LedgerError::from)?;
        let draft = EntryDraft::new(entry_type, payload, at)
            .with_change_set(snapshot.request.change_set_id.to_string())
            .with_check(snapshot.request.check_id.clone());
        Ok(self.ledger.append(draft).await?)
    }

    async fn notify(
        &self,
        kind: NotificationKind,
        request: &OverrideRequest,
        actor: &str,
        payload: serde_json::Value,
    ) {
        let event = NotificationEvent::new(
            kind,
            request.change_set_id.to_string(),
            self.clock.now(),
            payload,
        )
        .with_check(request.check_id.clone())
        .with_actor(actor);
        deliver(self.notifier.as_ref(), event).await;
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// File an override request.
    ///
    /// Self-service requests are approved on the spot and recorded as a
    /// single `override_approved` entry. Escalated requests stay `pending`
    /// with an [`EscalationTicket`] whose deadline follows the SLA policy.
    #[instrument(skip_all, fields(check_id = %request.check_id, tier = %request.requested_tier))]
    pub async fn request_override(&self, request: OverrideRequest) -> OverrideResult<OverrideTicket> {
        self.validate(&request)?;

        let now = self.clock.now();
        let mut request = request;
        request.created_at = now;
        request.status = RequestStatus::Pending;
        request.resolved_by = None;
        request.resolved_at = None;
        request.resolution_note = None;

        let mut table = self.table.lock().await;
        if table.requests.contains_key(&request.id) {
            request.id = Uuid::new_v4();
        }

        if !request.requested_tier.is_escalated() {
            let approved = request.resolved(
                RequestStatus::Approved,
                Some(request.requested_by.as_str()),
                now,
                None,
            );
            let snapshot = OverrideSnapshot {
                request: approved.clone(),
                escalation: None,
            };
            self.append(EntryType::OverrideApproved, &snapshot, now)
                .await?;
            table.apply(snapshot);
            drop(table);

            METRICS.inc_overrides_requested();
            METRICS.inc_overrides_approved();
            obs::emit_override_requested(
                approved.id,
                &approved.check_id,
                approved.requested_tier,
                &approved.requested_by,
            );
            obs::emit_override_approved(approved.id, &approved.check_id, &approved.requested_by);
            let record = approval_record(&approved, &approved.requested_by, now);
            self.notify(
                NotificationKind::OverrideApproved,
                &approved,
                &approved.requested_by,
                json!({ "record": record, "auto_approved": true }),
            )
            .await;

            return Ok(OverrideTicket {
                request_id: approved.id,
                status: RequestStatus::Approved,
                escalation: None,
            });
        }

        let tier = request.requested_tier;
        let ticket = EscalationTicket {
            request_id: request.id,
            tier,
            opened_at: now,
            sla_deadline: self.settings.sla.deadline(tier, now).unwrap_or(now),
            notified_channels: channels_for(tier),
            resolution: None,
        };
        let snapshot = OverrideSnapshot {
            request: request.clone(),
            escalation: Some(ticket.clone()),
        };
        self.append(EntryType::OverrideRequested, &snapshot, now)
            .await?;
        table.apply(snapshot);
        drop(table);

        METRICS.inc_overrides_requested();
        obs::emit_override_requested(request.id, &request.check_id, tier, &request.requested_by);
        self.notify(
            NotificationKind::OverrideRequested,
            &request,
            &request.requested_by,
            json!({
                "request_id": request.id,
                "tier": tier,
                "justification": request.justification,
                "ticket_reference": request.ticket_reference,
                "sla_deadline": ticket.sla_deadline,
                "channels": ticket.notified_channels,
            }),
        )
        .await;

        Ok(OverrideTicket {
            request_id: request.id,
            status: RequestStatus::Pending,
            escalation: Some(ticket),
        })
    }

    /// Approve a pending request.
    ///
    /// # Errors
    ///
    /// `UnknownRequest`, `AlreadyResolved` (the request is terminal, nothing
    /// is written; or its SLA lapsed, in which case the expiry is written
    /// instead), `SelfApproval`, `InsufficientTier`, `StaleChangeSet`, or
    /// `LedgerWriteFailure` (the request stays pending).
    #[instrument(skip(self))]
    pub async fn approve(&self, request_id: Uuid, approver: &str) -> OverrideResult<OverrideRecord> {
        let mut table = self.table.lock().await;
        let current = table
            .requests
            .get(&request_id)
            .cloned()
            .ok_or(OverrideError::UnknownRequest(request_id))?;
        if current.status.is_terminal() {
            return Err(OverrideError::AlreadyResolved {
                request_id,
                status: current.status,
            });
        }
        if let Some(expired) = self.expire_if_breached(&mut table, &current).await? {
            drop(table);
            return Err(self.reject_late_decision(expired).await);
        }
        self.authorize(&current, approver)?;
        self.ensure_current(&current.change_set_id)?;

        let now = self.clock.now();
        let approved = current.resolved(RequestStatus::Approved, Some(approver), now, None);
        let snapshot = OverrideSnapshot {
            request: approved.clone(),
            escalation: table.tickets.get(&request_id).cloned().map(|mut t| {
                t.resolution = Some(RequestStatus::Approved);
                t
            }),
        };
        self.append(EntryType::OverrideApproved, &snapshot, now)
            .await?;
        table.apply(snapshot);
        drop(table);

        METRICS.inc_overrides_approved();
        obs::emit_override_approved(request_id, &approved.check_id, approver);
        let record = approval_record(&approved, approver, now);
        self.notify(
            NotificationKind::OverrideApproved,
            &approved,
            approver,
            json!({ "record": record, "auto_approved": false }),
        )
        .await;
        Ok(record)
    }

    /// Deny a pending request with a non-empty reason.
    #[instrument(skip(self, reason))]
    pub async fn deny(&self, request_id: Uuid, approver: &str, reason: &str) -> OverrideResult<()> {
        if reason.trim().is_empty() {
            return Err(OverrideError::MissingDenyReason);
        }

        let mut table = self.table.lock().await;
        let current = table
            .requests
            .get(&request_id)
            .cloned()
            .ok_or(OverrideError::UnknownRequest(request_id))?;
        if current.status.is_terminal() {
            return Err(OverrideError::AlreadyResolved {
                request_id,
                status: current.status,
            });
        }
        if let Some(expired) = self.expire_if_breached(&mut table, &current).await? {
            drop(table);
            return Err(self.reject_late_decision(expired).await);
        }
        self.authorize(&current, approver)?;

        let now = self.clock.now();
        let denied = current.resolved(
            RequestStatus::Denied,
            Some(approver),
            now,
            Some(reason.trim().to_string()),
        );
        let snapshot = OverrideSnapshot {
            request: denied.clone(),
            escalation: table.tickets.get(&request_id).cloned().map(|mut t| {
                t.resolution = Some(RequestStatus::Denied);
                t
            }),
        };
        self.append(EntryType::OverrideDenied, &snapshot, now).await?;
        table.apply(snapshot);
        drop(table);

        METRICS.inc_overrides_denied();
        obs::emit_override_denied(request_id, &denied.check_id, approver);
        self.notify(
            NotificationKind::OverrideDenied,
            &denied,
            approver,
            json!({ "request_id": request_id, "reason": reason.trim() }),
        )
        .await;
        Ok(())
    }

    /// Expire a pending request after its SLA lapsed.
    ///
    /// Returns `Ok(false)` without writing anything if the request already
    /// reached a terminal state (e.g. a concurrent approval won the race).
    #[instrument(skip(self))]
    pub async fn expire(&self, request_id: Uuid) -> OverrideResult<bool> {
        let mut table = self.table.lock().await;
        let current = table
            .requests
            .get(&request_id)
            .cloned()
            .ok_or(OverrideError::UnknownRequest(request_id))?;
        if current.status.is_terminal() {
            return Ok(false);
        }

        let snapshot = self.commit_expiry(&mut table, current).await?;
        drop(table);
        self.announce_expiry(snapshot).await;
        Ok(true)
    }

    /// Expire `current` in place when its ticket is past the SLA deadline,
    /// so a late decision cannot win over a sweep that has not run yet.
    async fn expire_if_breached(
        &self,
        table: &mut OverrideTable,
        current: &OverrideRequest,
    ) -> OverrideResult<Option<OverrideSnapshot>> {
        let now = self.clock.now();
        let breached = table
            .tickets
            .get(&current.id)
            .is_some_and(|t| t.is_breached_at(now));
        if !breached {
            return Ok(None);
        }
        Ok(Some(self.commit_expiry(table, current.clone()).await?))
    }

    async fn commit_expiry(
        &self,
        table: &mut OverrideTable,
        current: OverrideRequest,
    ) -> OverrideResult<OverrideSnapshot> {
        let now = self.clock.now();
        let expired = current.resolved(
            RequestStatus::Expired,
            None,
            now,
            Some("SLA deadline passed without a decision".to_string()),
        );
        let snapshot = OverrideSnapshot {
            request: expired,
            escalation: table.tickets.get(&current.id).cloned().map(|mut t| {
                t.resolution = Some(RequestStatus::Expired);
                t
            }),
        };
        self.append(EntryType::OverrideExpired, &snapshot, now)
            .await?;
        table.apply(snapshot.clone());
        Ok(snapshot)
    }

    async fn announce_expiry(&self, snapshot: OverrideSnapshot) {
        let expired = &snapshot.request;
        METRICS.inc_overrides_expired();
        obs::emit_override_expired(expired.id, &expired.check_id);
        self.notify(
            NotificationKind::OverrideExpired,
            expired,
            "escalation-scheduler",
            json!({
                "request_id": expired.id,
                "sla_deadline": snapshot.escalation.as_ref().map(|t| t.sla_deadline),
            }),
        )
        .await;
    }

    /// Expire a breached request on behalf of a late `approve`/`deny` and
    /// report it as already resolved.
    async fn reject_late_decision(&self, snapshot: OverrideSnapshot) -> OverrideError {
        let request_id = snapshot.request.id;
        self.announce_expiry(snapshot).await;
        OverrideError::AlreadyResolved {
            request_id,
            status: RequestStatus::Expired,
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get(&self, request_id: Uuid) -> Option<OverrideRequest> {
        self.table.lock().await.requests.get(&request_id).cloned()
    }

    pub async fn ticket(&self, request_id: Uuid) -> Option<EscalationTicket> {
        self.table.lock().await.tickets.get(&request_id).cloned()
    }

    /// Every request filed against `change_set`, oldest first.
    pub async fn requests_for(&self, change_set: &ChangeSetId) -> Vec<OverrideRequest> {
        let table = self.table.lock().await;
        let mut requests: Vec<_> = table
            .requests
            .values()
            .filter(|r| &r.change_set_id == change_set)
            .cloned()
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        requests
    }

    /// Approved overrides for `change_set`, keyed by check id. When a check
    /// was approved more than once the latest approval is kept.
    pub async fn approved_overrides(
        &self,
        change_set: &ChangeSetId,
    ) -> BTreeMap<String, OverrideRecord> {
        let records: Vec<OverrideRecord> = self
            .requests_for(change_set)
            .await
            .iter()
            .filter_map(OverrideRecord::from_request)
            .collect();
        latest_per_check(records)
    }

    /// Tickets still awaiting a decision, earliest deadline first.
    pub async fn open_tickets(&self) -> Vec<EscalationTicket> {
        let table = self.table.lock().await;
        let mut tickets: Vec<_> = table
            .tickets
            .values()
            .filter(|t| t.is_open())
            .cloned()
            .collect();
        tickets.sort_by(|a, b| {
            a.sla_deadline
                .cmp(&b.sla_deadline)
                .then(a.request_id.cmp(&b.request_id))
        });
        tickets
    }

    // -----------------------------------------------------------------------
    // Replay
    // -----------------------------------------------------------------------

    /// Rebuild the request table and escalation tickets from the ledger.
    /// Writes nothing. Returns the number of override entries replayed.
    pub async fn restore(&self) -> GateResult<usize> {
        let entries = collect_entries(
            self.ledger.as_ref(),
            LedgerFilter::of_types(&[
                EntryType::OverrideRequested,
                EntryType::OverrideApproved,
                EntryType::OverrideDenied,
                EntryType::OverrideExpired,
            ]),
        )
        .await?;

        let mut fresh = OverrideTable::default();
        for entry in &entries {
            fresh.apply(entry.payload_as::<OverrideSnapshot>()?);
        }
        *self.table.lock().await = fresh;
        Ok(entries.len())
    }
}
