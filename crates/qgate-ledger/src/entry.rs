//! Ledger entry model and hash chain.
//!
//! Each [`LedgerEntry`] commits to its predecessor through `prev_digest`, so
//! any edit, deletion or reordering of stored history is detected by
//! [`verify_chain`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::LedgerError;
use crate::LedgerResult;

/// `prev_digest` of the first entry in a ledger.
pub const GENESIS_DIGEST: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of an entry body chained to its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Digest `body` chained onto `prev`.
    pub fn chained(prev: &str, body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(prev.as_bytes());
        hasher.update(b"\n");
        hasher.update(body);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Entry types
// ---------------------------------------------------------------------------

/// Kind of state transition recorded by an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    CheckRunCompleted,
    VerdictComputed,
    OverrideRequested,
    OverrideApproved,
    OverrideDenied,
    OverrideExpired,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckRunCompleted => "check_run_completed",
            Self::VerdictComputed => "verdict_computed",
            Self::OverrideRequested => "override_requested",
            Self::OverrideApproved => "override_approved",
            Self::OverrideDenied => "override_denied",
            Self::OverrideExpired => "override_expired",
        }
    }

    /// Whether this entry records a change to an override request.
    pub fn is_override_transition(self) -> bool {
        matches!(
            self,
            Self::OverrideRequested
                | Self::OverrideApproved
                | Self::OverrideDenied
                | Self::OverrideExpired
        )
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry as submitted by a writer, before the ledger assigns its
/// sequence number and chain digests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDraft {
    pub entry_type: EntryType,
    /// Change set the transition belongs to (`id@revision` form).
    pub change_set_id: Option<String>,
    /// Check the transition concerns, if any.
    pub check_id: Option<String>,
    /// Snapshot of the entity at the moment of transition.
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl EntryDraft {
    pub fn new(
        entry_type: EntryType,
        payload: serde_json::Value,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_type,
            change_set_id: None,
            check_id: None,
            payload,
            recorded_at,
        }
    }

    pub fn with_change_set(mut self, change_set_id: impl Into<String>) -> Self {
        self.change_set_id = Some(change_set_id.into());
        self
    }

    pub fn with_check(mut self, check_id: impl Into<String>) -> Self {
        self.check_id = Some(check_id.into());
        self
    }

    /// Seal the draft into an entry at `sequence_number`, chained onto
    /// `prev_digest`.
    pub fn seal(self, sequence_number: u64, prev_digest: &str) -> LedgerResult<LedgerEntry> {
        let mut entry = LedgerEntry {
            sequence_number,
            entry_type: self.entry_type,
            change_set_id: self.change_set_id,
            check_id: self.check_id,
            payload: self.payload,
            recorded_at: self.recorded_at,
            prev_digest: prev_digest.to_string(),
            digest: ContentDigest(String::new()),
        };
        entry.digest = entry.compute_digest()?;
        Ok(entry)
    }
}

/// A single immutable record in the compliance ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Strictly increasing, starting at 1, never reused.
    pub sequence_number: u64,
    pub entry_type: EntryType,
    pub change_set_id: Option<String>,
    pub check_id: Option<String>,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
    /// Digest of the previous entry ([`GENESIS_DIGEST`] for the first one).
    pub prev_digest: String,
    pub digest: ContentDigest,
}

impl LedgerEntry {
    /// Canonical body covered by the digest. `serde_json` maps are sorted,
    /// so the encoding is stable across processes.
    fn canonical_body(&self) -> LedgerResult<Vec<u8>> {
        let body = json!({
            "sequence_number": self.sequence_number,
            "entry_type": self.entry_type,
            "change_set_id": self.change_set_id,
            "check_id": self.check_id,
            "payload": self.payload,
            "recorded_at": self.recorded_at,
        });
        Ok(serde_json::to_vec(&body)?)
    }

    fn compute_digest(&self) -> LedgerResult<ContentDigest> {
        Ok(ContentDigest::chained(
            &self.prev_digest,
            &self.canonical_body()?,
        ))
    }

    /// Recompute this entry's digest and compare it to the stored one.
    pub fn verify_digest(&self) -> bool {
        self.compute_digest()
            .map(|d| d == self.digest)
            .unwrap_or(false)
    }

    /// Decode the payload into a typed entity.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> LedgerResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Verify a complete ledger history from its first entry.
///
/// Checks that sequence numbers run 1, 2, 3, ... without gaps, that every
/// entry links to its predecessor, and that every digest recomputes.
pub fn verify_chain(entries: &[LedgerEntry]) -> LedgerResult<()> {
    let mut prev = GENESIS_DIGEST.to_string();
    for (idx, entry) in entries.iter().enumerate() {
        let expected_seq = idx as u64 + 1;
        if entry.sequence_number != expected_seq {
            return Err(LedgerError::ChainBroken {
                sequence: entry.sequence_number,
                reason: format!("expected sequence {expected_seq}"),
            });
        }
        if entry.prev_digest != prev {
            return Err(LedgerError::ChainBroken {
                sequence: entry.sequence_number,
                reason: "prev_digest does not match predecessor".to_string(),
            });
        }
        if !entry.verify_digest() {
            return Err(LedgerError::ChainBroken {
                sequence: entry.sequence_number,
                reason: "digest does not match entry content".to_string(),
            });
        }
        prev = entry.digest.as_str().to_string();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Query filter
// ---------------------------------------------------------------------------

/// Read-side filter for [`crate::ComplianceLedger::query`].
///
/// All set fields must match; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub entry_types: Option<Vec<EntryType>>,
    pub change_set_id: Option<String>,
    pub check_id: Option<String>,
    /// Inclusive lower bound on `recorded_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `recorded_at`.
    pub until: Option<DateTime<Utc>>,
    /// Only entries with a sequence number strictly greater than this.
    pub after_sequence: Option<u64>,
}

impl LedgerFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of_types(types: &[EntryType]) -> Self {
        Self {
            entry_types: Some(types.to_vec()),
            ..Self::default()
        }
    }

    pub fn for_change_set(mut self, change_set_id: impl Into<String>) -> Self {
        self.change_set_id = Some(change_set_id.into());
        self
    }

    pub fn for_check(mut self, check_id: impl Into<String>) -> Self {
        self.check_id = Some(check_id.into());
        self
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn after(mut self, sequence: u64) -> Self {
        self.after_sequence = Some(sequence);
        self
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(types) = &self.entry_types {
            if !types.contains(&entry.entry_type) {
                return false;
            }
        }
        if let Some(cs) = &self.change_set_id {
            if entry.change_set_id.as_deref() != Some(cs.as_str()) {
                return false;
            }
        }
        if let Some(check) = &self.check_id {
            if entry.check_id.as_deref() != Some(check.as_str()) {
                return false;
            }
        }
        if self.since.is_some_and(|since| entry.recorded_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| entry.recorded_at >= until) {
            return false;
        }
        if self
            .after_sequence
            .is_some_and(|after| entry.sequence_number <= after)
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn chain(n: u64) -> Vec<LedgerEntry> {
        let now = Utc::now();
        let mut prev = GENESIS_DIGEST.to_string();
        let mut out = Vec::new();
        for seq in 1..=n {
            let entry = EntryDraft::new(
                EntryType::CheckRunCompleted,
                json!({ "n": seq }),
                now + Duration::seconds(seq as i64),
            )
            .with_change_set("pr-1@abc")
            .with_check("sql-injection")
            .seal(seq, &prev)
            .unwrap();
            prev = entry.digest.as_str().to_string();
            out.push(entry);
        }
        out
    }

    #[test]
    fn test_sealed_chain_verifies() {
        let entries = chain(4);
        assert!(verify_chain(&entries).is_ok());
        assert_eq!(entries[0].prev_digest, GENESIS_DIGEST);
        assert_eq!(entries[1].prev_digest, entries[0].digest.as_str());
    }

    #[test]
    fn test_tampered_payload_detected() {
        let mut entries = chain(3);
        entries[1].payload = json!({ "n": 99 });
        let err = verify_chain(&entries).unwrap_err();
        assert!(matches!(err, LedgerError::ChainBroken { sequence: 2, .. }));
    }

    #[test]
    fn test_removed_entry_detected() {
        let mut entries = chain(3);
        entries.remove(1);
        assert!(verify_chain(&entries).is_err());
    }

    #[test]
    fn test_digest_is_deterministic() {
        let now = Utc::now();
        let a = EntryDraft::new(EntryType::OverrideApproved, json!({"b": 1, "a": 2}), now)
            .seal(1, GENESIS_DIGEST)
            .unwrap();
        let b = EntryDraft::new(EntryType::OverrideApproved, json!({"a": 2, "b": 1}), now)
            .seal(1, GENESIS_DIGEST)
            .unwrap();
        assert_eq!(a.digest, b.digest);
    }

    #[test]
    fn test_filter_matching() {
        let entries = chain(3);
        let by_type = LedgerFilter::of_types(&[EntryType::OverrideApproved]);
        assert!(!by_type.matches(&entries[0]));

        let by_seq = LedgerFilter::all().after(2);
        assert!(!by_seq.matches(&entries[1]));
        assert!(by_seq.matches(&entries[2]));

        let by_check = LedgerFilter::all().for_check("sql-injection");
        assert!(by_check.matches(&entries[0]));
        let other = LedgerFilter::all().for_change_set("pr-2@abc");
        assert!(!other.matches(&entries[0]));

        let window = LedgerFilter::all().between(
            entries[1].recorded_at,
            entries[2].recorded_at,
        );
        assert!(!window.matches(&entries[0]));
        assert!(window.matches(&entries[1]));
        assert!(!window.matches(&entries[2]));
    }

    #[test]
    fn test_entry_serde_keeps_digest_valid() {
        let entries = chain(2);
        let line = serde_json::to_string(&entries[1]).unwrap();
        let back: LedgerEntry = serde_json::from_str(&line).unwrap();
        assert!(back.verify_digest());
    }
}
