//! SLA-tracked escalation tickets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::override_request::{RequestStatus, RequestTier};

/// Created for every request routed above self-service. Refers to its
/// parent request by id only; the override manager owns the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationTicket {
    pub request_id: Uuid,
    pub tier: RequestTier,
    pub opened_at: DateTime<Utc>,
    pub sla_deadline: DateTime<Utc>,
    pub notified_channels: Vec<String>,
    /// Mirrors the parent request's terminal status.
    pub resolution: Option<RequestStatus>,
}

impl EscalationTicket {
    pub fn is_open(&self) -> bool {
        self.resolution.is_none()
    }

    /// Open and past its deadline at `now`.
    pub fn is_breached_at(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && now >= self.sla_deadline
    }
}

/// Channels notified when a request escalates to `tier`.
pub fn channels_for(tier: RequestTier) -> Vec<String> {
    let channels: &[&str] = match tier {
        RequestTier::SelfService => &[],
        RequestTier::TechLead => &["tech-leads"],
        RequestTier::SecurityTeam => &["security-team"],
        RequestTier::Emergency => &["incident-response", "security-team"],
    };
    channels.iter().map(|c| c.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_breach_only_while_open() {
        let now = Utc::now();
        let mut ticket = EscalationTicket {
            request_id: Uuid::new_v4(),
            tier: RequestTier::TechLead,
            opened_at: now,
            sla_deadline: now + Duration::hours(4),
            notified_channels: channels_for(RequestTier::TechLead),
            resolution: None,
        };
        assert!(!ticket.is_breached_at(now + Duration::hours(3)));
        assert!(ticket.is_breached_at(now + Duration::hours(4)));

        ticket.resolution = Some(RequestStatus::Approved);
        assert!(!ticket.is_breached_at(now + Duration::hours(5)));
    }
}
