use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::entry::Entry;

/// In-memory mirror of the unread set last reported upstream.
///
/// Every operation takes the lock once, so a wholesale replace and a
/// targeted removal never interleave element by element.
#[derive(Debug, Default)]
pub struct UnreadCache {
    entries: Mutex<Vec<Entry>>,
}

impl UnreadCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap in a new unread set.
    ///
    /// Duplicate ids keep the position of their first occurrence and the
    /// content of their last.
    pub fn replace(&self, entries: Vec<Entry>) {
        let mut slot_by_id: HashMap<String, usize> = HashMap::with_capacity(entries.len());
        let mut unique: Vec<Entry> = Vec::with_capacity(entries.len());
        for entry in entries {
            match slot_by_id.get(&entry.id) {
                Some(&slot) => unique[slot] = entry,
                None => {
                    slot_by_id.insert(entry.id.clone(), unique.len());
                    unique.push(entry);
                }
            }
        }

        *self.lock() = unique;
    }

    /// Drop entries whose id is in `ids`. Unknown ids are ignored.
    /// Returns how many entries were removed.
    pub fn remove(&self, ids: &HashSet<String>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|entry| !ids.contains(&entry.id));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Independent copy of the current contents, in upstream order.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<Entry> {
        self.lock().iter().find(|entry| entry.id == id).cloned()
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
