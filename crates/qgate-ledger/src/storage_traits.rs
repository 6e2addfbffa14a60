//! Storage trait definition for the compliance ledger
//!
//! `ComplianceLedger` is the only seam between the gate engine and durable
//! history. Implementations must guarantee:
//! - `append` is atomic: either the entry is durably written with the next
//!   sequence number, or an error is returned and nothing changed.
//! - sequence numbers are strictly increasing, start at 1 and are never
//!   reused, even across restarts.
//! - `query` yields entries in ascending sequence order and never mutates.
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;

use crate::entry::{EntryDraft, LedgerEntry, LedgerFilter};
use crate::LedgerResult;

/// Lazy, ordered stream of entries returned by a query.
pub type EntryStream<'a> = BoxStream<'a, LedgerResult<LedgerEntry>>;

/// Append-only compliance ledger.
#[async_trait]
pub trait ComplianceLedger: Send + Sync {
    /// Seal and durably append `draft`, returning its sequence number.
    async fn append(&self, draft: EntryDraft) -> LedgerResult<u64>;

    /// Stream every entry matching `filter`, oldest first.
    async fn query(&self, filter: LedgerFilter) -> LedgerResult<EntryStream<'static>>;

    /// Sequence number of the newest entry, or `None` for an empty ledger.
    async fn last_sequence(&self) -> LedgerResult<Option<u64>>;
}

/// Drain a query into a `Vec`.
pub async fn collect_entries(
    ledger: &dyn ComplianceLedger,
    filter: LedgerFilter,
) -> LedgerResult<Vec<LedgerEntry>> {
    ledger.query(filter).await?.try_collect().await
}
