//! In-memory fakes for the ledger trait (testing and dry runs)
//!
//! Provides `MemoryLedger`, which satisfies the `ComplianceLedger` contract
//! without touching disk, and `FailingLedger`, which can be switched into a
//! write-rejecting state to exercise ledger-outage paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::stream;

use crate::entry::{EntryDraft, LedgerEntry, LedgerFilter, GENESIS_DIGEST};
use crate::error::LedgerError;
use crate::storage_traits::{ComplianceLedger, EntryStream};
use crate::LedgerResult;

// ---------------------------------------------------------------------------
// MemoryLedger
// ---------------------------------------------------------------------------

/// In-memory ledger backed by a `Vec<LedgerEntry>`.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a ledger with already-sealed history (used by replay tests).
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Snapshot of every stored entry.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ComplianceLedger for MemoryLedger {
    async fn append(&self, draft: EntryDraft) -> LedgerResult<u64> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let (seq, prev) = match entries.last() {
            Some(last) => (last.sequence_number + 1, last.digest.as_str().to_string()),
            None => (1, GENESIS_DIGEST.to_string()),
        };
        let entry = draft.seal(seq, &prev)?;
        entries.push(entry);
        Ok(seq)
    }

    async fn query(&self, filter: LedgerFilter) -> LedgerResult<EntryStream<'static>> {
        let matched: Vec<LedgerResult<LedgerEntry>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .map(Ok)
            .collect();
        Ok(Box::pin(stream::iter(matched)))
    }

    async fn last_sequence(&self) -> LedgerResult<Option<u64>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|e| e.sequence_number))
    }
}

// ---------------------------------------------------------------------------
// FailingLedger
// ---------------------------------------------------------------------------

/// Memory ledger whose appends can be made to fail on demand.
#[derive(Debug, Default)]
pub struct FailingLedger {
    inner: MemoryLedger,
    failing: AtomicBool,
}

impl FailingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or stop) rejecting every append.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.inner.entries()
    }
}

#[async_trait]
impl ComplianceLedger for FailingLedger {
    async fn append(&self, draft: EntryDraft) -> LedgerResult<u64> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LedgerError::WriteRejected(format!(
                "simulated outage while appending {}",
                draft.entry_type
            )));
        }
        self.inner.append(draft).await
    }

    async fn query(&self, filter: LedgerFilter) -> LedgerResult<EntryStream<'static>> {
        self.inner.query(filter).await
    }

    async fn last_sequence(&self) -> LedgerResult<Option<u64>> {
        self.inner.last_sequence().await
    }
}
