//! Trait contract tests for ComplianceLedger.
//!
//! Every backend is run through the same checks: sequence numbering,
//! ordering, filtering, chain integrity and concurrent appends.

use std::sync::Arc;

use chrono::{Duration, Utc};
use qgate_ledger::{
    collect_entries, verify_chain, ComplianceLedger, EntryDraft, EntryType, FailingLedger,
    JsonlLedger, LedgerError, LedgerFilter, MemoryLedger,
};
use serde_json::json;

fn draft(entry_type: EntryType, check: &str) -> EntryDraft {
    EntryDraft::new(entry_type, json!({ "check": check }), Utc::now())
        .with_change_set("pr-42@r1")
        .with_check(check)
}

async fn assert_sequences_start_at_one(ledger: &dyn ComplianceLedger) {
    assert_eq!(ledger.last_sequence().await.unwrap(), None);
    let a = ledger
        .append(draft(EntryType::CheckRunCompleted, "sql-injection"))
        .await
        .unwrap();
    let b = ledger
        .append(draft(EntryType::VerdictComputed, "sql-injection"))
        .await
        .unwrap();
    assert_eq!((a, b), (1, 2));
    assert_eq!(ledger.last_sequence().await.unwrap(), Some(2));
}

async fn assert_query_ordered_and_filtered(ledger: &dyn ComplianceLedger) {
    ledger
        .append(draft(EntryType::OverrideRequested, "n-plus-one-queries"))
        .await
        .unwrap();
    ledger
        .append(draft(EntryType::OverrideApproved, "n-plus-one-queries"))
        .await
        .unwrap();
    ledger
        .append(draft(EntryType::OverrideRequested, "layer-separation"))
        .await
        .unwrap();

    let all = collect_entries(ledger, LedgerFilter::all()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all
        .windows(2)
        .all(|w| w[0].sequence_number < w[1].sequence_number));
    verify_chain(&all).unwrap();

    let requested = collect_entries(
        ledger,
        LedgerFilter::of_types(&[EntryType::OverrideRequested]),
    )
    .await
    .unwrap();
    assert_eq!(requested.len(), 2);

    let one_check = collect_entries(ledger, LedgerFilter::all().for_check("n-plus-one-queries"))
        .await
        .unwrap();
    assert_eq!(one_check.len(), 2);

    let future = collect_entries(
        ledger,
        LedgerFilter::all().between(Utc::now() + Duration::hours(1), Utc::now() + Duration::hours(2)),
    )
    .await
    .unwrap();
    assert!(future.is_empty());
}

#[tokio::test]
async fn memory_sequences_start_at_one() {
    assert_sequences_start_at_one(&MemoryLedger::new()).await;
}

#[tokio::test]
async fn jsonl_sequences_start_at_one() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = JsonlLedger::open(dir.path().join("ledger.jsonl"))
        .await
        .unwrap();
    assert_sequences_start_at_one(&ledger).await;
}

#[tokio::test]
async fn memory_query_ordered_and_filtered() {
    assert_query_ordered_and_filtered(&MemoryLedger::new()).await;
}

#[tokio::test]
async fn jsonl_query_ordered_and_filtered() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = JsonlLedger::open(dir.path().join("ledger.jsonl"))
        .await
        .unwrap();
    assert_query_ordered_and_filtered(&ledger).await;
}

#[tokio::test]
async fn concurrent_appends_get_unique_sequences() {
    let dir = tempfile::tempdir().unwrap();
    let ledger: Arc<dyn ComplianceLedger> = Arc::new(
        JsonlLedger::open(dir.path().join("ledger.jsonl"))
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..16 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            ledger
                .append(draft(EntryType::CheckRunCompleted, &format!("check-{i}")))
                .await
                .unwrap()
        }));
    }
    let mut seqs = Vec::new();
    for h in handles {
        seqs.push(h.await.unwrap());
    }
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=16).collect::<Vec<u64>>());

    let all = collect_entries(ledger.as_ref(), LedgerFilter::all())
        .await
        .unwrap();
    verify_chain(&all).unwrap();
}

#[tokio::test]
async fn failing_ledger_rejects_without_consuming_sequence() {
    let ledger = FailingLedger::new();
    ledger
        .append(draft(EntryType::OverrideRequested, "memory-leak"))
        .await
        .unwrap();

    ledger.set_failing(true);
    let err = ledger
        .append(draft(EntryType::OverrideApproved, "memory-leak"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::WriteRejected(_)));

    ledger.set_failing(false);
    let seq = ledger
        .append(draft(EntryType::OverrideApproved, "memory-leak"))
        .await
        .unwrap();
    assert_eq!(seq, 2);
    assert_eq!(ledger.entries().len(), 2);
}
