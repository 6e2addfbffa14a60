//! Engine-level error taxonomy.
//!
//! Every error maps to a closed [`ErrorKind`] carrying a stable string code
//! and process exit code, so automation can branch on the outcome without
//! parsing messages.

use qgate_ledger::LedgerError;
use serde::Serialize;

use crate::overrides::OverrideError;

/// Exit code for a run or status query whose verdict is `blocked`.
pub const EXIT_VERDICT_BLOCKED: i32 = 2;

/// Stable classification of every failure the engine surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Internal,
    InvalidJustification,
    CannotOverride,
    InsufficientTier,
    AlreadyResolved,
    StaleChangeSet,
    LedgerWriteFailure,
    UnknownCheck,
    UnknownRequest,
    MissingIncidentReference,
    SelfApproval,
    CheckNotFailing,
    UnknownChangeSet,
    LedgerCorrupted,
    InvalidConfig,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::Internal => "INTERNAL",
            Self::InvalidJustification => "INVALID_JUSTIFICATION",
            Self::CannotOverride => "CANNOT_OVERRIDE",
            Self::InsufficientTier => "INSUFFICIENT_TIER",
            Self::AlreadyResolved => "ALREADY_RESOLVED",
            Self::StaleChangeSet => "STALE_CHANGE_SET",
            Self::LedgerWriteFailure => "LEDGER_WRITE_FAILURE",
            Self::UnknownCheck => "UNKNOWN_CHECK",
            Self::UnknownRequest => "UNKNOWN_REQUEST",
            Self::MissingIncidentReference => "MISSING_INCIDENT_REFERENCE",
            Self::SelfApproval => "SELF_APPROVAL",
            Self::CheckNotFailing => "CHECK_NOT_FAILING",
            Self::UnknownChangeSet => "UNKNOWN_CHANGE_SET",
            Self::LedgerCorrupted => "LEDGER_CORRUPTED",
            Self::InvalidConfig => "INVALID_CONFIG",
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            Self::Internal => 1,
            Self::InvalidJustification => 10,
            Self::CannotOverride => 11,
            Self::InsufficientTier => 12,
            Self::AlreadyResolved => 13,
            Self::StaleChangeSet => 14,
            Self::LedgerWriteFailure => 15,
            Self::UnknownCheck => 16,
            Self::UnknownRequest => 17,
            Self::MissingIncidentReference => 18,
            Self::SelfApproval => 19,
            Self::CheckNotFailing => 20,
            Self::UnknownChangeSet => 21,
            Self::LedgerCorrupted => 22,
            Self::InvalidConfig => 23,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors surfaced by the gate engine.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Override(#[from] OverrideError),

    #[error("change set {requested} is stale; current revision is {current}")]
    StaleChangeSet { requested: String, current: String },

    #[error("unknown change set: {0}")]
    UnknownChangeSet(String),

    #[error("unknown check: {0}")]
    UnknownCheck(String),

    #[error("check {check_id} is not failing on {change_set}")]
    CheckNotFailing { check_id: String, change_set: String },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Override(e) => e.kind(),
            Self::StaleChangeSet { .. } => ErrorKind::StaleChangeSet,
            Self::UnknownChangeSet(_) => ErrorKind::UnknownChangeSet,
            Self::UnknownCheck(_) => ErrorKind::UnknownCheck,
            Self::CheckNotFailing { .. } => ErrorKind::CheckNotFailing,
            Self::Ledger(e) if e.is_integrity_failure() => ErrorKind::LedgerCorrupted,
            Self::Ledger(_) => ErrorKind::LedgerWriteFailure,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Io(_) | Self::Serialization(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for gate operations.
pub type GateResult<T> = std::result::Result<T, GateError>;
