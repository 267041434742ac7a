use crate::ledger::cache::{ItemCache, ItemMap};
use crate::ledger::domain::{ItemId, UnlockedItem};

/// An optimistic cache write that can be undone if the remote call fails.
#[derive(Debug)]
#[must_use = "a change is either kept (dropped) or rolled back"]
pub struct PendingChange {
    item_id: ItemId,
    previous: Option<UnlockedItem>,
}

impl PendingChange {
    pub fn put(items: &mut ItemMap, item: UnlockedItem) -> Self {
        let item_id = item.item_id();
        let previous = items.insert(item_id, item);
        Self { item_id, previous }
    }

    pub fn remove(items: &mut ItemMap, item_id: ItemId) -> Self {
        let previous = items.remove(&item_id);
        Self { item_id, previous }
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn previous(&self) -> Option<&UnlockedItem> {
        self.previous.as_ref()
    }

    /// Restores the entry as it was before the change.
    pub fn rollback(self, cache: &ItemCache) {
        let mut items = cache.lock();
        match self.previous {
            Some(previous) => {
                items.insert(self.item_id, previous);
            }
            None => {
                items.remove(&self.item_id);
            }
        }
        log::debug!("[ACTION] rolled back cache entry {}", self.item_id);
    }
}
