//! Error types for the override manager.

use qgate_ledger::LedgerError;
use uuid::Uuid;

use crate::domain::RequestStatus;
use crate::error::ErrorKind;

/// Validation and lifecycle errors from override handling.
#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    #[error("unknown check: {check_id}")]
    UnknownCheck { check_id: String },

    #[error("check {check_id} cannot be overridden")]
    CannotOverride { check_id: String },

    #[error("invalid justification: {reason}")]
    InvalidJustification { reason: String },

    #[error("a deny reason is required")]
    MissingDenyReason,

    #[error("emergency override of {check_id} requires an incident reference")]
    MissingIncidentReference { check_id: String },

    #[error("insufficient tier for {principal}: {held} does not satisfy {required}")]
    InsufficientTier {
        principal: String,
        required: String,
        held: String,
    },

    #[error("change set {requested} is stale; current revision is {current}")]
    StaleChangeSet { requested: String, current: String },

    #[error("unknown override request: {0}")]
    UnknownRequest(Uuid),

    #[error("override request {request_id} already {status}")]
    AlreadyResolved {
        request_id: Uuid,
        status: RequestStatus,
    },

    #[error("{principal} cannot resolve their own request {request_id}")]
    SelfApproval { request_id: Uuid, principal: String },

    #[error("ledger write failed, transition not applied: {0}")]
    LedgerWriteFailure(#[from] LedgerError),
}

impl OverrideError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownCheck { .. } => ErrorKind::UnknownCheck,
            Self::CannotOverride { .. } => ErrorKind::CannotOverride,
            Self::InvalidJustification { .. } | Self::MissingDenyReason => {
                ErrorKind::InvalidJustification
            }
            Self::MissingIncidentReference { .. } => ErrorKind::MissingIncidentReference,
            Self::InsufficientTier { .. } => ErrorKind::InsufficientTier,
            Self::StaleChangeSet { .. } => ErrorKind::StaleChangeSet,
            Self::UnknownRequest(_) => ErrorKind::UnknownRequest,
            Self::AlreadyResolved { .. } => ErrorKind::AlreadyResolved,
            Self::SelfApproval { .. } => ErrorKind::SelfApproval,
            Self::LedgerWriteFailure(_) => ErrorKind::LedgerWriteFailure,
        }
    }
}

/// Result type for override operations.
pub type OverrideResult<T> = std::result::Result<T, OverrideError>;
