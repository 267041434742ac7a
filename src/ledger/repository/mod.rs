//! Public facade of the ledger.
//!
//! The `Repository` owns the action queue, the connection state machine, the
//! local cache and the periodic reconciliation timer. Callers never touch the
//! remote table: every operation either reads a snapshot of the cache or
//! enqueues an action and hands back a `Pending` result.
//!
//! Inserts issued before the repository is ready are buffered and replayed
//! once the initial load has finished, so unlocks observed during startup
//! are neither lost nor written twice.

mod sync;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::config::LedgerConfig;
use crate::ledger::action::{
    DeleteItemAction, ExecutionContext, InsertItemAction, LoadAllItemsAction, SyncAction,
};
use crate::ledger::cache::{ItemCache, ItemMap};
use crate::ledger::clock::{Clock, SystemClock};
use crate::ledger::domain::{ItemId, UnlockedItem};
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::listeners::{ListenerId, ListenerSet};
use crate::ledger::pending::{self, Completer, Pending};
use crate::ledger::queue::ActionQueue;
use crate::ledger::state::{ConnectionState, StateMachine};
use crate::ledger::table::api::{TableApi, TableConnector};
use crate::ledger::table::http::HttpTableConnector;

use self::sync::SyncScheduler;

const CLOSED: &str = "repository closed";

/// Insert requested before the repository was ready.
struct BufferedInsert {
    item: UnlockedItem,
    completer: Completer<UnlockedItem>,
}

/// Per-connection values, replaced on every initialize and close.
#[derive(Default)]
struct Session {
    api: Option<Arc<dyn TableApi>>,
    current_user: Option<String>,
    /// Bumped by `close`; completions from an older session are discarded.
    generation: u64,
}

struct Inner {
    config: LedgerConfig,
    connector: Arc<dyn TableConnector>,
    clock: Arc<dyn Clock>,
    queue: ActionQueue,
    state: StateMachine,
    /// Swapped for a fresh cache on close so late writes from an in-flight
    /// batch land in the discarded one.
    cache: RwLock<ItemCache>,
    session: Mutex<Session>,
    buffered_inserts: Mutex<Vec<BufferedInsert>>,
    item_listeners: ListenerSet<[UnlockedItem]>,
    sync: Mutex<Option<SyncScheduler>>,
}

pub struct Repository {
    inner: Arc<Inner>,
}

impl Repository {
    pub fn new(
        config: LedgerConfig,
        connector: Arc<dyn TableConnector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let state = StateMachine::new();
            let weak = weak.clone();
            state.add_listener(move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.refresh_context();
                }
            });

            Inner {
                queue: ActionQueue::from_config(&config),
                config,
                connector,
                clock,
                state,
                cache: RwLock::new(ItemCache::new()),
                session: Mutex::new(Session::default()),
                buffered_inserts: Mutex::new(Vec::new()),
                item_listeners: ListenerSet::new("item"),
                sync: Mutex::new(None),
            }
        });

        inner.refresh_context();
        Self { inner }
    }

    /// Repository talking to a real table over HTTP.
    pub fn with_http(config: LedgerConfig) -> Self {
        let connector = Arc::new(HttpTableConnector::new(config.request_timeout()));
        Self::new(config, connector, Arc::new(SystemClock))
    }

    /// Connects to `endpoint` as `user` and loads the whole ledger.
    ///
    /// Resolves once the repository is READY. On failure the state moves to
    /// ERROR and the error is returned. Initializing again ends the current
    /// session first; inserts buffered during startup survive a retry and are
    /// replayed once the new session is ready.
    pub fn initialize(&self, endpoint: &str, user: &str) -> Pending<()> {
        let inner = &self.inner;

        if inner.state.current() != ConnectionState::NotInitialized {
            log::info!("[REPO] re-initializing, ending current session");
            inner.end_session();
        }

        log::info!("[REPO] initializing ledger for {}", user);
        inner.state.transition(ConnectionState::Initializing);

        let api = match inner.connector.connect(endpoint) {
            Ok(api) => api,
            Err(e) => {
                inner.state.fail(e.to_string());
                return Pending::ready(Err(e));
            }
        };

        let generation = {
            let mut session = inner.session.lock();
            session.api = Some(api);
            session.current_user = Some(user.to_string());
            session.generation
        };

        if !inner.state.transition(ConnectionState::LoadingData) {
            return Pending::ready(Err(LedgerError::Closed(CLOSED)));
        }

        let (completer, pending) = pending::channel();
        let weak = Arc::downgrade(inner);
        inner.queue.submit_with(LoadAllItemsAction::new(), move |result| {
            let result = match weak.upgrade() {
                Some(inner) => inner.finish_initialize(generation, result),
                None => Err(LedgerError::Closed(CLOSED)),
            };
            completer.complete(result);
        });
        pending
    }

    /// Records `item` as unlocked by the current user.
    ///
    /// Resolves to the ledger entry for the item id: the new one, or the
    /// existing one if the item was already unlocked by anyone.
    pub fn insert_item(&self, item: UnlockedItem) -> Pending<UnlockedItem> {
        let (completer, pending) = pending::channel();

        {
            let mut buffered = self.inner.buffered_inserts.lock();
            if !self.inner.state.is_ready() {
                log::debug!(
                    "[REPO] not ready, buffering insert of item {}",
                    item.item_id()
                );
                buffered.push(BufferedInsert { item, completer });
                return pending;
            }
        }

        self.inner.insert_or_short_circuit(item, completer);
        pending
    }

    /// Removes an item. Waits in the queue until the repository is ready.
    pub fn delete_item(&self, item_id: ItemId) -> Pending<()> {
        log::debug!("[REPO] queuing delete of item {}", item_id);
        self.inner.queue.submit(DeleteItemAction::new(item_id))
    }

    /// Copy of the cache, safe to iterate without holding any lock.
    pub fn get_unlocked_items(&self) -> ItemMap {
        self.inner.cache().snapshot()
    }

    pub fn has_item(&self, item_id: ItemId) -> bool {
        self.inner.cache().contains(item_id)
    }

    /// New item attributed to the current user.
    pub fn create_new_item(&self, item_id: ItemId, item_name: impl Into<String>) -> UnlockedItem {
        UnlockedItem::new(item_id, item_name, self.current_user())
    }

    /// Reconciles with the remote table now instead of waiting for the timer.
    ///
    /// Resolves to the entries other members wrote since the watermark.
    pub fn sync_now(&self) -> Pending<Vec<UnlockedItem>> {
        self.inner.request_sync()
    }

    /// Disconnects and rejects all outstanding work.
    ///
    /// Queued and buffered operations fail with `LedgerError::Closed`. An
    /// action already executing finishes against the old session. The
    /// repository can be initialized again afterwards.
    pub fn close(&self) {
        log::info!("[REPO] closing ledger");
        let inner = &self.inner;
        inner.end_session();

        let buffered: Vec<_> = inner.buffered_inserts.lock().drain(..).collect();
        for insert in buffered {
            insert.completer.complete(Err(LedgerError::Closed(CLOSED)));
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.current()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state.is_ready()
    }

    /// Why the last initialize failed, while in ERROR.
    pub fn last_error(&self) -> Option<String> {
        self.inner.state.last_error()
    }

    pub fn current_user(&self) -> String {
        self.inner.current_user()
    }

    /// Changes who new unlocks are attributed to, without reconnecting.
    pub fn set_current_user(&self, user: &str) {
        log::info!("[REPO] current user is now {}", user);
        self.inner.session.lock().current_user = Some(user.to_string());
        self.inner.refresh_context();
    }

    /// Actions waiting in the queue, not counting buffered inserts.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.inner.config
    }

    /// Called with every batch of newly visible entries: own successful
    /// inserts and other members' unlocks found by sync.
    pub fn add_item_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&[UnlockedItem]) + Send + Sync + 'static,
    {
        self.inner.item_listeners.add(listener)
    }

    pub fn remove_item_listener(&self, id: ListenerId) -> bool {
        self.inner.item_listeners.remove(id)
    }

    /// Called with the current state right away and on every change.
    pub fn add_state_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.inner.state.add_listener(listener)
    }

    pub fn remove_state_listener(&self, id: ListenerId) -> bool {
        self.inner.state.remove_listener(id)
    }
}

impl Inner {
    /// Drops the connection, queued actions, the timer and the cache.
    /// Buffered inserts are left for the next session.
    fn end_session(&self) {
        {
            let mut session = self.session.lock();
            session.generation += 1;
            session.api = None;
            session.current_user = None;
        }

        self.state.reset();
        self.queue.clear();

        let scheduler = self.sync.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop();
        }

        let old = std::mem::take(&mut *self.cache.write());
        old.clear();
    }

    fn cache(&self) -> ItemCache {
        self.cache.read().clone()
    }

    fn current_user(&self) -> String {
        self.session.lock().current_user.clone().unwrap_or_default()
    }

    /// Hands the queue a context reflecting the current session and state.
    fn refresh_context(&self) {
        let (api, current_user) = {
            let session = self.session.lock();
            (session.api.clone(), session.current_user.clone())
        };
        let ctx = ExecutionContext::new(api, self.cache(), current_user, self.state.is_ready());
        self.queue.update_context(ctx);
    }

    fn finish_initialize(self: &Arc<Self>, generation: u64, result: Result<ItemMap>) -> Result<()> {
        // Generation check and cache install happen under the session lock,
        // ordered against close.
        let count = {
            let session = self.session.lock();
            if session.generation != generation {
                log::debug!("[REPO] discarding load from a closed session");
                return Err(LedgerError::Closed(CLOSED));
            }

            match result {
                Ok(items) => {
                    let count = items.len();
                    self.cache().replace_all(items);
                    count
                }
                Err(e) => {
                    drop(session);
                    log::error!("[REPO] failed to initialize ledger: {}", e);
                    self.state.fail(e.to_string());
                    return Err(e);
                }
            }
        };

        if !self.state.transition(ConnectionState::Ready) {
            return Err(LedgerError::Closed(CLOSED));
        }
        log::info!("[REPO] ledger ready with {} unlocked items", count);

        self.replay_buffered_inserts(generation);
        self.start_sync(generation);
        Ok(())
    }

    /// Submits buffered inserts against session `generation`.
    ///
    /// A session that already ended leaves them buffered: `close` rejects
    /// them, a re-initialize replays them once it is ready.
    fn replay_buffered_inserts(self: &Arc<Self>, generation: u64) {
        let session = self.session.lock();
        if session.generation != generation {
            log::debug!("[REPO] session ended before replay, keeping buffered inserts");
            return;
        }

        let buffered: Vec<_> = self.buffered_inserts.lock().drain(..).collect();
        if buffered.is_empty() {
            return;
        }

        log::info!("[REPO] replaying {} inserts buffered during startup", buffered.len());
        for insert in buffered {
            self.insert_or_short_circuit(insert.item, insert.completer);
        }
    }

    fn insert_or_short_circuit(self: &Arc<Self>, item: UnlockedItem, completer: Completer<UnlockedItem>) {
        if let Some(existing) = self.cache().get(item.item_id()) {
            log::debug!("[REPO] item {} already unlocked", item.item_id());
            completer.complete(Ok(existing));
            return;
        }

        let weak = Arc::downgrade(self);
        self.queue.submit_with(InsertItemAction::new(item), move |result| {
            let result = result.map(|outcome| {
                if outcome.inserted {
                    if let Some(inner) = weak.upgrade() {
                        inner.item_listeners.notify(std::slice::from_ref(&outcome.item));
                    }
                }
                outcome.item
            });
            completer.complete(result);
        });
    }

    /// Latest cached acquisition time, or a short look-back when empty.
    fn watermark(&self) -> DateTime<Utc> {
        self.cache()
            .max_acquired_on()
            .unwrap_or_else(|| self.clock.now() - self.config.empty_cache_lookback())
    }

    fn request_sync(self: &Arc<Self>) -> Pending<Vec<UnlockedItem>> {
        let state = self.state.current();
        if !state.is_ready() {
            return Pending::ready(Err(LedgerError::NotReady(state)));
        }

        let since = self.watermark();
        log::debug!("[SYNC] requesting changes since {}", since);

        let (completer, pending) = pending::channel();
        let weak = Arc::downgrade(self);
        self.queue
            .submit_with(SyncAction::new(since, self.current_user()), move |result| {
                if let (Ok(items), Some(inner)) = (&result, weak.upgrade()) {
                    if !items.is_empty() {
                        inner.item_listeners.notify(items);
                    }
                }
                completer.complete(result);
            });
        pending
    }

    fn start_sync(self: &Arc<Self>, generation: u64) {
        // Holding the session lock orders this against a concurrent close.
        let previous = {
            let session = self.session.lock();
            if session.generation != generation {
                return;
            }

            let weak = Arc::downgrade(self);
            let scheduler = SyncScheduler::start(self.config.sync_period(), move || {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                if inner.state.is_ready() {
                    // Results reach listeners through the completion.
                    let _ = inner.request_sync();
                }
                true
            });

            let previous = self.sync.lock().replace(scheduler);
            previous
        };

        if let Some(previous) = previous {
            previous.stop();
        }
    }
}
