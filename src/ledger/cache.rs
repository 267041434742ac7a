//! Local read-through cache of the ledger.
//!
//! The cache is the only mutable state shared between the queue worker and
//! caller threads. Every read-modify-write goes through one lock, and readers
//! that iterate take a snapshot instead of holding it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use crate::ledger::domain::{ItemId, UnlockedItem};

pub type ItemMap = HashMap<ItemId, UnlockedItem>;

#[derive(Debug, Clone, Default)]
pub struct ItemCache {
    items: Arc<Mutex<ItemMap>>,
}

impl ItemCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds the cache lock for a multi-step read-modify-write.
    pub fn lock(&self) -> MutexGuard<'_, ItemMap> {
        self.items.lock()
    }

    pub fn get(&self, item_id: ItemId) -> Option<UnlockedItem> {
        self.items.lock().get(&item_id).cloned()
    }

    pub fn contains(&self, item_id: ItemId) -> bool {
        self.items.lock().contains_key(&item_id)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn snapshot(&self) -> ItemMap {
        self.items.lock().clone()
    }

    pub fn replace_all(&self, items: ItemMap) {
        *self.items.lock() = items;
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Latest store-assigned acquisition time, the sync watermark.
    pub fn max_acquired_on(&self) -> Option<DateTime<Utc>> {
        self.items
            .lock()
            .values()
            .filter_map(UnlockedItem::acquired_on)
            .max()
    }
}
