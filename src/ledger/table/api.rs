use std::sync::Arc;

use crate::ledger::domain::UnlockedItem;
use crate::ledger::error::Result;

/// Minimal remote table interface used by the actions.
/// Everything is keyed by partition + row key.
///
/// Calls block the calling thread; only the queue worker makes them.
pub trait TableApi: Send + Sync {
    /// Point lookup. `Ok(None)` when no such entity exists.
    fn get_entity(&self, partition_key: &str, row_key: &str) -> Result<Option<UnlockedItem>>;

    /// All entities matching an OData filter, or every entity when `filter` is `None`.
    fn list_entities(&self, filter: Option<&str>) -> Result<Vec<UnlockedItem>>;

    /// Callers make sure the key is not taken yet; the store rejects duplicates.
    fn insert_entity(&self, item: &UnlockedItem) -> Result<()>;

    /// Deleting an entity that does not exist succeeds.
    fn delete_entity(&self, partition_key: &str, row_key: &str) -> Result<()>;
}

/// Builds a table client for an endpoint during repository initialization.
pub trait TableConnector: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn TableApi>>;
}
