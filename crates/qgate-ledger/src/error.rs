//! Error types for qgate-ledger

use thiserror::Error;

/// Errors that can occur in the ledger persistence layer
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Underlying file I/O failed
    #[error("ledger I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Entry could not be encoded or decoded
    #[error("ledger serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored line could not be parsed back into an entry
    #[error("ledger corrupted at line {line}: {reason}")]
    Corrupted { line: usize, reason: String },

    /// The hash chain or sequence numbering does not verify
    #[error("ledger chain broken at sequence {sequence}: {reason}")]
    ChainBroken { sequence: u64, reason: String },

    /// The backend refused the write (used by fakes to simulate outages)
    #[error("ledger write rejected: {0}")]
    WriteRejected(String),
}

impl LedgerError {
    /// Whether this error means stored history failed verification, as
    /// opposed to a transient write/read failure.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::Corrupted { .. } | Self::ChainBroken { .. })
    }
}
