//! QGate Ledger: append-only compliance history
//!
//! This crate is the persistence layer of the quality gate. Every state
//! transition the engine performs (check run completed, verdict computed,
//! override requested/approved/denied/expired) is appended here as one
//! [`LedgerEntry`], and nothing is ever rewritten.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: strict sequence ordering, tamper evidence, replayability.
//!
//! ## Key Components
//!
//! - `ComplianceLedger`: async storage trait (append + lazy query)
//! - `LedgerEntry`: sequence-numbered, hash-chained record
//! - `MemoryLedger` / `FailingLedger`: in-memory fakes
//! - `JsonlLedger`: durable JSON-lines file backend

pub mod entry;
mod error;
pub mod fakes;
pub mod jsonl;
pub mod storage_traits;

pub use entry::{
    verify_chain, ContentDigest, EntryDraft, EntryType, LedgerEntry, LedgerFilter, GENESIS_DIGEST,
};
pub use error::LedgerError;
pub use fakes::{FailingLedger, MemoryLedger};
pub use jsonl::JsonlLedger;
pub use storage_traits::{collect_entries, ComplianceLedger, EntryStream};

/// Result type for ledger operations
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
