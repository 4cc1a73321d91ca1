//! Identity-keyed map of open media resources.

use crate::store::{RecordMap, StateSlice};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

struct Tracked<H: ?Sized, R> {
    handle: Arc<H>,
    record: R,
}

/// Concurrent map pairing each media-engine handle with its published record.
///
/// Every mutation publishes into the store slice while the entry's shard is
/// still locked, so the store and the map change together.
pub struct ResourceMap<H: ?Sized, R> {
    entries: DashMap<String, Tracked<H, R>>,
    slice: Arc<StateSlice<RecordMap<R>>>,
}

impl<H: ?Sized, R> std::fmt::Debug for ResourceMap<H, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMap")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<H: ?Sized, R: Clone> ResourceMap<H, R> {
    pub(crate) fn new(slice: Arc<StateSlice<RecordMap<R>>>) -> Self {
        Self {
            entries: DashMap::new(),
            slice,
        }
    }

    /// Insert or replace.
    pub fn insert(&self, id: String, handle: Arc<H>, record: R) {
        let published = record.clone();
        let _guard = self
            .entries
            .entry(id.clone())
            .insert(Tracked { handle, record });
        self.slice.modify(|map| {
            map.insert(id, published);
            true
        });
    }

    /// Remove, returning the handle and its last record.
    pub fn remove(&self, id: &str) -> Option<(Arc<H>, R)> {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                self.slice.modify(|map| map.remove(id).is_some());
                let tracked = entry.remove();
                Some((tracked.handle, tracked.record))
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Mutate a record in place. Returns `false` for a missing id or no change.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut R) -> bool) -> bool {
        let Some(mut entry) = self.entries.get_mut(id) else {
            return false;
        };
        if !f(&mut entry.record) {
            return false;
        }
        let published = entry.record.clone();
        self.slice.modify(|map| {
            map.insert(id.to_string(), published);
            true
        });
        true
    }

    #[must_use]
    pub fn handle(&self, id: &str) -> Option<Arc<H>> {
        self.entries.get(id).map(|entry| Arc::clone(&entry.handle))
    }

    #[must_use]
    pub fn record(&self, id: &str) -> Option<R> {
        self.entries.get(id).map(|entry| entry.record.clone())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Handles whose record matches `predicate`, sorted by id.
    pub fn find(&self, predicate: impl Fn(&R) -> bool) -> Vec<(String, Arc<H>)> {
        let mut found: Vec<(String, Arc<H>)> = self
            .entries
            .iter()
            .filter(|entry| predicate(&entry.record))
            .map(|entry| (entry.key().clone(), Arc::clone(&entry.handle)))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    /// Remove every entry, returning the handles to close.
    pub fn drain(&self) -> Vec<(Arc<H>, R)> {
        let ids: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
