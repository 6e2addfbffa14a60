//! Current-revision tracking and cooperative cancellation.
//!
//! Each change-set id has at most one current revision. Starting work on a
//! new revision supersedes the old one: its cancellation channel flips to
//! `true` so in-flight checks stop, and later operations on it fail with
//! `StaleChangeSet`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tracing::info;

use crate::domain::ChangeSetId;

struct Current {
    revision: String,
    cancel: watch::Sender<bool>,
}

#[derive(Default)]
pub struct RevisionTracker {
    current: Mutex<HashMap<String, Current>>,
}

impl RevisionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `change_set` the current revision of its id and return its
    /// cancellation receiver. Any other revision of the same id is cancelled.
    pub fn begin(&self, change_set: &ChangeSetId) -> watch::Receiver<bool> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = current.get(&change_set.id) {
            if existing.revision == change_set.revision {
                return existing.cancel.subscribe();
            }
        }

        let (tx, rx) = watch::channel(false);
        if let Some(old) = current.insert(
            change_set.id.clone(),
            Current {
                revision: change_set.revision.clone(),
                cancel: tx,
            },
        ) {
            info!(
                change_set = %change_set.id,
                superseded = %old.revision,
                current = %change_set.revision,
                "revision superseded"
            );
            old.cancel.send_replace(true);
        }
        rx
    }

    /// Record `revision` as current for `id` without starting work on it.
    pub fn supersede(&self, id: &str, revision: &str) {
        self.begin(&ChangeSetId::new(id, revision));
    }

    /// Current revision of `id`, if any has been seen.
    pub fn current(&self, id: &str) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|c| c.revision.clone())
    }

    /// `Err(current_revision)` when another revision of the same id is current.
    /// Ids never seen are treated as current.
    pub fn check_current(&self, change_set: &ChangeSetId) -> Result<(), String> {
        match self.current(&change_set.id) {
            Some(rev) if rev != change_set.revision => Err(rev),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for RevisionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_map()
            .entries(current.iter().map(|(k, v)| (k, &v.revision)))
            .finish()
    }
}
