//! Escalation SLAs and the expiry sweeper.
//!
//! Requests routed above self-service carry an [`EscalationTicket`] with an
//! SLA deadline. [`EscalationScheduler::sweep`] expires every open ticket
//! past its deadline through [`OverrideManager::expire`], which resolves
//! races with concurrent approvals: only one `pending -> terminal`
//! transition ever succeeds.
//!
//! [`EscalationTicket`]: crate::domain::EscalationTicket

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::domain::RequestTier;
use crate::error::GateResult;
use crate::obs;
use crate::overrides::OverrideManager;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Time source for timestamps and SLA comparisons.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// SLA policy
// ---------------------------------------------------------------------------

/// Wall-clock response windows per escalated tier, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub tech_lead_secs: i64,
    pub security_team_secs: i64,
    pub emergency_secs: i64,
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self {
            tech_lead_secs: 4 * 60 * 60,
            security_team_secs: 8 * 60 * 60,
            emergency_secs: 15 * 60,
        }
    }
}

impl SlaPolicy {
    /// Response window for `tier`; `None` for self-service.
    pub fn window(&self, tier: RequestTier) -> Option<Duration> {
        let secs = match tier {
            RequestTier::SelfService => return None,
            RequestTier::TechLead => self.tech_lead_secs,
            RequestTier::SecurityTeam => self.security_team_secs,
            RequestTier::Emergency => self.emergency_secs,
        };
        Some(Duration::seconds(secs))
    }

    pub fn deadline(&self, tier: RequestTier, opened_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.window(tier).map(|w| opened_at + w)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Open tickets looked at.
    pub examined: usize,
    /// Requests this sweep moved to `expired`.
    pub expired: Vec<Uuid>,
    /// Breached requests already resolved by a concurrent writer.
    pub lost_races: usize,
    /// Breached requests whose expiry could not be written.
    pub failed: Vec<Uuid>,
}

pub struct EscalationScheduler {
    manager: Arc<OverrideManager>,
    resync: bool,
}

impl EscalationScheduler {
    pub fn new(manager: Arc<OverrideManager>) -> Self {
        Self {
            manager,
            resync: false,
        }
    }

    /// Rebuild override state from the ledger before every periodic sweep.
    /// Needed when other processes write to the same ledger.
    pub fn with_resync(mut self, resync: bool) -> Self {
        self.resync = resync;
        self
    }

    /// Expire every open ticket whose deadline is at or before `now`.
    #[instrument(skip(self), fields(now = %now))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let tickets = self.manager.open_tickets().await;
        let mut report = SweepReport {
            examined: tickets.len(),
            ..SweepReport::default()
        };

        for ticket in tickets.iter().filter(|t| t.is_breached_at(now)) {
            match self.manager.expire(ticket.request_id).await {
                Ok(true) => report.expired.push(ticket.request_id),
                Ok(false) => report.lost_races += 1,
                Err(e) => {
                    warn!(request_id = %ticket.request_id, error = %e, "failed to expire request");
                    report.failed.push(ticket.request_id);
                }
            }
        }

        obs::emit_escalation_sweep(report.examined, report.expired.len());
        report
    }

    /// Sweep every `interval` until `shutdown` flips to `true`.
    pub async fn run_periodic(
        &self,
        interval: std::time::Duration,
        clock: Arc<dyn Clock>,
        mut shutdown: watch::Receiver<bool>,
    ) -> GateResult<()> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    if self.resync {
                        if let Err(e) = self.manager.restore().await {
                            if e.kind() == crate::error::ErrorKind::LedgerCorrupted {
                                return Err(e);
                            }
                            warn!(error = %e, "ledger resync failed, sweeping stale state");
                        }
                    }
                    self.sweep(clock.now()).await;
                }
            }
        }
    }
}
