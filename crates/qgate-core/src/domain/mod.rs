//! QGate domain model.

pub mod change_set;
pub mod check;
pub mod escalation;
pub mod override_request;
pub mod result;
pub mod verdict;

pub use change_set::ChangeSetId;
pub use check::{Category, Check, EnforcementMode, OverrideTier, Severity};
pub use escalation::{channels_for, EscalationTicket};
pub use override_request::{OverrideRecord, OverrideRequest, RequestStatus, RequestTier};
pub use result::{
    CheckResult, CheckStatus, Finding, Location, EXECUTION_ERROR_PREFIX, NO_RESULT_FINDING,
    TIMEOUT_FINDING,
};
pub use verdict::{OverallStatus, ReviewVerdict};
