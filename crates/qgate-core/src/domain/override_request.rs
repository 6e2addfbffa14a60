//! Override requests and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::change_set::ChangeSetId;
use super::check::OverrideTier;

/// Tier at which an override is requested.
///
/// The three standard tiers mirror [`OverrideTier`]; `Emergency` is
/// orthogonal: usable against any check tier but tied to an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestTier {
    SelfService,
    TechLead,
    SecurityTeam,
    Emergency,
}

impl RequestTier {
    /// Standard tier equivalent; `None` for emergency requests.
    pub fn standard(self) -> Option<OverrideTier> {
        match self {
            Self::SelfService => Some(OverrideTier::SelfService),
            Self::TechLead => Some(OverrideTier::TechLead),
            Self::SecurityTeam => Some(OverrideTier::SecurityTeam),
            Self::Emergency => None,
        }
    }

    /// Whether a second principal must resolve requests at this tier.
    pub fn is_escalated(self) -> bool {
        !matches!(self, Self::SelfService)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SelfService => "self-service",
            Self::TechLead => "tech-lead",
            Self::SecurityTeam => "security-team",
            Self::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for RequestTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self-service" => Ok(Self::SelfService),
            "tech-lead" => Ok(Self::TechLead),
            "security-team" => Ok(Self::SecurityTeam),
            "emergency" => Ok(Self::Emergency),
            other => Err(format!("unknown override tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Denied => write!(f, "denied"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// A request to waive one failing check on one change-set revision.
///
/// Once terminal the request is never mutated again; a retry needs a new
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub id: Uuid,
    pub check_id: String,
    pub change_set_id: ChangeSetId,
    pub requested_by: String,
    pub requested_tier: RequestTier,
    pub justification: String,
    pub ticket_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: RequestStatus,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Deny reason, or the expiry notice.
    #[serde(default)]
    pub resolution_note: Option<String>,
}

impl OverrideRequest {
    pub fn new(
        check_id: impl Into<String>,
        change_set_id: ChangeSetId,
        requested_by: impl Into<String>,
        requested_tier: RequestTier,
        justification: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            check_id: check_id.into(),
            change_set_id,
            requested_by: requested_by.into(),
            requested_tier,
            justification: justification.into(),
            ticket_reference: None,
            created_at: Utc::now(),
            status: RequestStatus::Pending,
            resolved_by: None,
            resolved_at: None,
            resolution_note: None,
        }
    }

    pub fn with_ticket(mut self, ticket_reference: impl Into<String>) -> Self {
        self.ticket_reference = Some(ticket_reference.into());
        self
    }

    /// Copy of this request moved into a terminal state.
    pub(crate) fn resolved(
        &self,
        status: RequestStatus,
        by: Option<&str>,
        at: DateTime<Utc>,
        note: Option<String>,
    ) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.resolved_by = by.map(str::to_string);
        next.resolved_at = Some(at);
        next.resolution_note = note;
        next
    }
}

/// Audit record of an approved override, as carried by a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub request_id: Uuid,
    pub check_id: String,
    pub tier: RequestTier,
    pub requested_by: String,
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
    pub justification: String,
    pub ticket_reference: Option<String>,
}

impl OverrideRecord {
    /// Build the record for an approved request; `None` if not approved.
    pub fn from_request(request: &OverrideRequest) -> Option<Self> {
        if request.status != RequestStatus::Approved {
            return None;
        }
        Some(Self {
            request_id: request.id,
            check_id: request.check_id.clone(),
            tier: request.requested_tier,
            requested_by: request.requested_by.clone(),
            approved_by: request
                .resolved_by
                .clone()
                .unwrap_or_else(|| request.requested_by.clone()),
            approved_at: request.resolved_at.unwrap_or(request.created_at),
            justification: request.justification.clone(),
            ticket_reference: request.ticket_reference.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(RequestStatus::Approved.is_terminal());
        assert!(RequestStatus::Denied.is_terminal());
        assert!(RequestStatus::Expired.is_terminal());
    }

    #[test]
    fn test_emergency_has_no_standard_tier() {
        assert_eq!(RequestTier::Emergency.standard(), None);
        assert_eq!(
            RequestTier::TechLead.standard(),
            Some(OverrideTier::TechLead)
        );
        assert!(!RequestTier::SelfService.is_escalated());
    }

    #[test]
    fn test_record_only_for_approved() {
        let req = OverrideRequest::new(
            "memory-leak",
            ChangeSetId::new("pr-1", "a"),
            "dana",
            RequestTier::SelfService,
            "justification",
        );
        assert!(OverrideRecord::from_request(&req).is_none());

        let approved = req.resolved(RequestStatus::Approved, Some("dana"), Utc::now(), None);
        let record = OverrideRecord::from_request(&approved).unwrap();
        assert_eq!(record.request_id, req.id);
        assert_eq!(record.approved_by, "dana");
    }
}
