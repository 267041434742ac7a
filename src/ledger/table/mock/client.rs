use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::ledger::clock::{Clock, SystemClock};
use crate::ledger::domain::{UnlockedItem, PARTITION_KEY};
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::table::api::{TableApi, TableConnector};
use crate::ledger::table::filter::TimestampFilter;

#[derive(Default)]
struct TableState {
    rows: BTreeMap<(String, String), UnlockedItem>,
    last_timestamp: Option<DateTime<Utc>>,
    failures: VecDeque<LedgerError>,
    inserts: usize,
    deletes: usize,
    lists: usize,
    filters: Vec<Option<String>>,
}

/// In-process table with the same contract as the remote store.
///
/// Clones share the same rows, so several repositories (one per simulated
/// group member) can sync through one instance. Every write is stamped with
/// a strictly increasing timestamp, like the store's own write time.
#[derive(Clone)]
pub struct InMemoryTable {
    state: Arc<Mutex<TableState>>,
    clock: Arc<dyn Clock>,
    latency: Duration,
}

impl Default for InMemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTable {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TableState::default())),
            clock,
            latency: Duration::ZERO,
        }
    }

    /// Every call sleeps this long first, to simulate a slow store.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes the next call (of any kind) fail with `error`.
    pub fn fail_next(&self, error: LedgerError) {
        self.state.lock().failures.push_back(error);
    }

    /// Writes a row directly, as another group member's client would.
    pub fn seed(&self, item: UnlockedItem) -> UnlockedItem {
        let mut s = self.state.lock();
        let stamped = Self::stamp(&mut s, self.clock.now(), item);
        s.rows.insert((PARTITION_KEY.to_string(), stamped.row_key()), stamped.clone());
        stamped
    }

    pub fn rows(&self) -> Vec<UnlockedItem> {
        self.state.lock().rows.values().cloned().collect()
    }

    pub fn insert_calls(&self) -> usize {
        self.state.lock().inserts
    }

    pub fn delete_calls(&self) -> usize {
        self.state.lock().deletes
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().lists
    }

    /// Filters passed to `list_entities`, in call order.
    pub fn filters(&self) -> Vec<Option<String>> {
        self.state.lock().filters.clone()
    }

    fn stamp(s: &mut TableState, now: DateTime<Utc>, item: UnlockedItem) -> UnlockedItem {
        let at = match s.last_timestamp {
            Some(last) if now <= last => last + chrono::Duration::milliseconds(1),
            _ => now,
        };
        s.last_timestamp = Some(at);
        item.with_acquired_on(at)
    }

    fn begin(&self) -> Result<()> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        match self.state.lock().failures.pop_front() {
            Some(err) => {
                log::debug!("[MOCK] injected failure: {}", err);
                Err(err)
            }
            None => Ok(()),
        }
    }
}

impl TableApi for InMemoryTable {
    fn get_entity(&self, partition_key: &str, row_key: &str) -> Result<Option<UnlockedItem>> {
        self.begin()?;
        let s = self.state.lock();
        Ok(s.rows
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned())
    }

    fn list_entities(&self, filter: Option<&str>) -> Result<Vec<UnlockedItem>> {
        {
            let mut s = self.state.lock();
            s.lists += 1;
            s.filters.push(filter.map(str::to_string));
        }
        self.begin()?;

        let parsed = filter.map(TimestampFilter::parse).transpose()?;
        let s = self.state.lock();
        Ok(s.rows
            .values()
            .filter(|item| parsed.as_ref().map_or(true, |f| f.matches(item)))
            .cloned()
            .collect())
    }

    fn insert_entity(&self, item: &UnlockedItem) -> Result<()> {
        self.state.lock().inserts += 1;
        self.begin()?;

        let mut s = self.state.lock();
        let key = (PARTITION_KEY.to_string(), item.row_key());
        if s.rows.contains_key(&key) {
            return Err(LedgerError::Transport {
                status: 409,
                body: "EntityAlreadyExists".to_string(),
            });
        }

        let now = self.clock.now();
        let stamped = Self::stamp(&mut s, now, item.clone());
        log::trace!("[MOCK] inserted {}", stamped.row_key());
        s.rows.insert(key, stamped);
        Ok(())
    }

    fn delete_entity(&self, partition_key: &str, row_key: &str) -> Result<()> {
        self.state.lock().deletes += 1;
        self.begin()?;

        self.state
            .lock()
            .rows
            .remove(&(partition_key.to_string(), row_key.to_string()));
        Ok(())
    }
}

/// Hands out the same `InMemoryTable` for every endpoint.
#[derive(Clone)]
pub struct MemoryConnector {
    table: InMemoryTable,
}

impl MemoryConnector {
    pub fn new(table: InMemoryTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &InMemoryTable {
        &self.table
    }
}

impl TableConnector for MemoryConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn TableApi>> {
        if endpoint.trim().is_empty() {
            return Err(LedgerError::InvalidEndpoint("empty endpoint".to_string()));
        }
        Ok(Arc::new(self.table.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::clock::ManualClock;
    use chrono::TimeZone;

    #[test]
    fn writes_in_the_same_instant_get_increasing_timestamps() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let table = InMemoryTable::with_clock(Arc::new(clock));

        let first = table.seed(UnlockedItem::new(1, "Bronze dagger", "Alice"));
        table.insert_entity(&UnlockedItem::new(2, "Iron dagger", "Bob")).unwrap();
        let second = table.get_entity(PARTITION_KEY, "2").unwrap().unwrap();

        assert!(second.acquired_on() > first.acquired_on());
        assert_eq!(table.get_entity(PARTITION_KEY, "3").unwrap(), None);
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let table = InMemoryTable::new();
        let item = UnlockedItem::new(995, "Coins", "Alice");
        table.insert_entity(&item).unwrap();

        let err = table.insert_entity(&item).unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert_eq!(table.insert_calls(), 2);
    }

    #[test]
    fn rejects_filters_it_does_not_understand() {
        let table = InMemoryTable::new();
        let err = table.list_entities(Some("AcquiredBy eq 'Alice'")).unwrap_err();
        assert!(matches!(err, LedgerError::UnsupportedFilter(_)));
    }

    #[test]
    fn connector_requires_an_endpoint() {
        let connector = MemoryConnector::new(InMemoryTable::new());
        assert!(connector.connect("").is_err());
        assert!(connector.connect("memory://group").is_ok());
    }
}
