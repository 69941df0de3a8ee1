//! Pre-delete capture of permission collections.
//!
//! # Purpose
//! A delete notification only carries ids, and once the rows are gone the ids
//! no longer resolve to a collection. [`DeleteTracker`] remembers the
//! collection of each id at the moment before the delete so the matching
//! documents can be exported afterwards.
//!
//! # Key invariants
//! - An entry lives from `capture` until the first `take` for its id.
//! - `take` removes entries before the caller exports, so a failing export
//!   cannot leave entries behind.
//! - All access goes through one mutex; no reader sees a half-written entry.
use crate::permission::PermissionId;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct DeleteTracker {
    pending: Mutex<HashMap<PermissionId, String>>,
}

impl DeleteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (PermissionId, String)>,
    {
        let mut pending = self.lock();
        for (id, collection) in entries {
            pending.insert(id, collection);
        }
    }

    /// Removes the entries for `ids` and returns their distinct collections.
    /// Ids that were never captured are ignored.
    pub fn take(&self, ids: &[PermissionId]) -> BTreeSet<String> {
        let mut pending = self.lock();
        ids.iter().filter_map(|id| pending.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PermissionId, String>> {
        // A panic while holding the lock cannot leave a partial entry behind.
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
