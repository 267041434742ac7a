use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};

use super::*;
use crate::ledger::clock::ManualClock;
use crate::ledger::table::filter::TimestampFilter;
use crate::ledger::table::mock::{InMemoryTable, MemoryConnector};

const ENDPOINT: &str = "memory://group";
const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> LedgerConfig {
    LedgerConfig {
        poll_interval_ms: 5,
        ..LedgerConfig::default()
    }
}

fn repository(table: &InMemoryTable) -> Repository {
    Repository::new(
        test_config(),
        Arc::new(MemoryConnector::new(table.clone())),
        Arc::new(SystemClock),
    )
}

fn ready_repository(table: &InMemoryTable, user: &str) -> Repository {
    let repo = repository(table);
    repo.initialize(ENDPOINT, user).wait_timeout(WAIT).unwrap();
    repo
}

/// Collects every batch handed to item listeners.
fn record_items(repo: &Repository) -> Arc<Mutex<Vec<Vec<ItemId>>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    repo.add_item_listener(move |items| {
        sink.lock()
            .unwrap()
            .push(items.iter().map(UnlockedItem::item_id).collect());
    });
    seen
}

#[test]
fn alice_and_bob_share_one_ledger() {
    let table = InMemoryTable::new();

    let repo = ready_repository(&table, "Alice");
    assert_eq!(repo.state(), ConnectionState::Ready);
    assert!(repo.get_unlocked_items().is_empty());

    let coins = repo
        .insert_item(repo.create_new_item(995, "Coins"))
        .wait_timeout(WAIT)
        .unwrap();
    assert_eq!(coins.acquired_by(), "Alice");

    repo.set_current_user("Bob");
    let again = repo
        .insert_item(repo.create_new_item(995, "Coins"))
        .wait_timeout(WAIT)
        .unwrap();
    assert_eq!(again, coins, "existing unlock is never overwritten");
    assert_eq!(table.insert_calls(), 1);

    repo.close();
    repo.initialize(ENDPOINT, "Bob").wait_timeout(WAIT).unwrap();

    let items = repo.get_unlocked_items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[&995].acquired_by(), "Alice");
    assert_eq!(repo.current_user(), "Bob");
}

#[test]
fn concurrent_inserts_reach_the_table_once() {
    let table = InMemoryTable::new().with_latency(Duration::from_millis(2));
    let repo = Arc::new(ready_repository(&table, "Alice"));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let repo = repo.clone();
            std::thread::spawn(move || {
                repo.insert_item(UnlockedItem::new(995, "Coins", ""))
                    .wait_timeout(WAIT)
            })
        })
        .collect();

    let results: Vec<UnlockedItem> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    assert_eq!(table.insert_calls(), 1);
    assert!(results.iter().all(|item| *item == results[0]));
    assert_eq!(results[0].acquired_by(), "Alice");
}

#[test]
fn own_insert_notifies_listeners_once() {
    let table = InMemoryTable::new();
    let repo = ready_repository(&table, "Alice");
    let seen = record_items(&repo);

    repo.insert_item(repo.create_new_item(995, "Coins"))
        .wait_timeout(WAIT)
        .unwrap();
    repo.insert_item(repo.create_new_item(995, "Coins"))
        .wait_timeout(WAIT)
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![vec![995]]);
}

#[test]
fn deleting_an_unknown_item_succeeds() {
    let table = InMemoryTable::new();
    let repo = ready_repository(&table, "Alice");

    repo.delete_item(12345).wait_timeout(WAIT).unwrap();
    assert_eq!(table.delete_calls(), 1);
}

#[test]
fn delete_removes_from_cache_and_table() {
    let table = InMemoryTable::new();
    table.seed(UnlockedItem::new(995, "Coins", "Alice"));
    let repo = ready_repository(&table, "Alice");
    assert!(repo.has_item(995));

    repo.delete_item(995).wait_timeout(WAIT).unwrap();

    assert!(!repo.has_item(995));
    assert!(table.rows().is_empty());
}

#[test]
fn inserts_before_ready_are_replayed_exactly_once() {
    let table = InMemoryTable::new();
    table.seed(UnlockedItem::new(1, "Bronze dagger", "Bob"));
    let repo = repository(&table);
    let seen = record_items(&repo);

    let known = repo.insert_item(UnlockedItem::new(1, "Bronze dagger", ""));
    let fresh = repo.insert_item(UnlockedItem::new(2, "Iron dagger", ""));
    assert_eq!(repo.queue_len(), 0, "buffered inserts do not enter the queue");

    repo.initialize(ENDPOINT, "Alice").wait_timeout(WAIT).unwrap();

    let known = known.wait_timeout(WAIT).unwrap();
    let fresh = fresh.wait_timeout(WAIT).unwrap();

    assert_eq!(known.acquired_by(), "Bob");
    assert_eq!(fresh.acquired_by(), "Alice");
    assert_eq!(table.insert_calls(), 1);
    assert_eq!(table.rows().len(), 2);
    assert_eq!(*seen.lock().unwrap(), vec![vec![2]]);
}

#[test]
fn close_rejects_outstanding_work_as_closed() {
    let table = InMemoryTable::new();
    let repo = repository(&table);

    let buffered = repo.insert_item(UnlockedItem::new(1, "Bronze dagger", ""));
    let queued = repo.delete_item(1);
    assert_eq!(repo.queue_len(), 1);

    repo.close();

    assert!(buffered.wait_timeout(WAIT).unwrap_err().is_closed());
    assert!(queued.wait_timeout(WAIT).unwrap_err().is_closed());
    assert_eq!(repo.queue_len(), 0);
    assert_eq!(table.delete_calls(), 0);
}

#[test]
fn close_empties_the_cache_and_resets_state() {
    let table = InMemoryTable::new();
    table.seed(UnlockedItem::new(1, "Bronze dagger", "Bob"));
    let repo = ready_repository(&table, "Alice");
    assert_eq!(repo.get_unlocked_items().len(), 1);

    repo.close();

    assert!(repo.get_unlocked_items().is_empty());
    assert_eq!(repo.state(), ConnectionState::NotInitialized);
    assert_eq!(repo.current_user(), "");
    assert!(matches!(
        repo.sync_now().wait_timeout(WAIT),
        Err(LedgerError::NotReady(ConnectionState::NotInitialized))
    ));
}

#[test]
fn failed_load_moves_to_error() {
    let table = InMemoryTable::new();
    table.fail_next(LedgerError::Transport {
        status: 403,
        body: "AuthenticationFailed".to_string(),
    });
    let repo = repository(&table);

    let err = repo.initialize(ENDPOINT, "Alice").wait_timeout(WAIT).unwrap_err();

    assert_eq!(err.status(), Some(403));
    assert_eq!(repo.state(), ConnectionState::Error);
    assert!(repo.last_error().unwrap().contains("AuthenticationFailed"));
    assert_eq!(
        err.user_message(),
        "Failed to connect to the group ledger. Check your access token."
    );
}

#[test]
fn invalid_endpoint_moves_to_error() {
    let repo = repository(&InMemoryTable::new());

    let err = repo.initialize("  ", "Alice").wait_timeout(WAIT).unwrap_err();

    assert!(matches!(err, LedgerError::InvalidEndpoint(_)));
    assert_eq!(repo.state(), ConnectionState::Error);
}

#[test]
fn retry_after_error_succeeds() {
    let table = InMemoryTable::new();
    table.fail_next(LedgerError::Transport {
        status: 503,
        body: "ServerBusy".to_string(),
    });
    let repo = repository(&table);
    let buffered = repo.insert_item(UnlockedItem::new(995, "Coins", ""));
    assert!(repo.initialize(ENDPOINT, "Alice").wait_timeout(WAIT).is_err());

    repo.initialize(ENDPOINT, "Alice").wait_timeout(WAIT).unwrap();

    assert!(repo.is_ready());
    assert_eq!(repo.last_error(), None);

    let coins = buffered.wait_timeout(WAIT).unwrap();
    assert_eq!(coins.acquired_by(), "Alice");
    assert_eq!(table.insert_calls(), 1);
    assert_eq!(table.rows().len(), 1);
}

#[test]
fn replay_for_an_ended_session_keeps_inserts_buffered() {
    let table = InMemoryTable::new();
    let repo = repository(&table);
    let stale = repo.inner.session.lock().generation;

    let buffered = repo.insert_item(UnlockedItem::new(995, "Coins", ""));
    repo.inner.end_session();
    repo.inner.replay_buffered_inserts(stale);

    assert_eq!(repo.inner.buffered_inserts.lock().len(), 1);
    assert_eq!(repo.queue_len(), 0);

    repo.close();
    assert!(buffered.wait_timeout(WAIT).unwrap_err().is_closed());
    assert_eq!(table.insert_calls(), 0);
}

#[test]
fn state_listeners_see_the_whole_lifecycle() {
    let table = InMemoryTable::new();
    let repo = repository(&table);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    repo.add_state_listener(move |state| sink.lock().unwrap().push(*state));
    repo.initialize(ENDPOINT, "Alice").wait_timeout(WAIT).unwrap();
    repo.close();

    use crate::ledger::state::ConnectionState::*;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![NotInitialized, Initializing, LoadingData, Ready, NotInitialized]
    );
}

#[test]
fn reinitializing_ends_the_previous_session() {
    let table = InMemoryTable::new();
    let repo = ready_repository(&table, "Alice");
    table.seed(UnlockedItem::new(7, "Logs", "Bob"));

    repo.initialize(ENDPOINT, "Alice").wait_timeout(WAIT).unwrap();

    assert!(repo.is_ready());
    assert!(repo.has_item(7));
    assert_eq!(table.list_calls(), 2);
}

#[test]
fn sync_reports_only_other_members_unlocks() {
    let table = InMemoryTable::new();
    let alice = ready_repository(&table, "Alice");
    let seen = record_items(&alice);

    alice
        .insert_item(alice.create_new_item(995, "Coins"))
        .wait_timeout(WAIT)
        .unwrap();

    let bob = ready_repository(&table, "Bob");
    bob.insert_item(bob.create_new_item(4151, "Abyssal whip"))
        .wait_timeout(WAIT)
        .unwrap();

    let from_others = alice.sync_now().wait_timeout(WAIT).unwrap();

    assert_eq!(from_others.len(), 1);
    assert_eq!(from_others[0].item_id(), 4151);
    assert_eq!(from_others[0].acquired_by(), "Bob");
    assert!(alice.has_item(4151));
    assert_eq!(*seen.lock().unwrap(), vec![vec![995], vec![4151]]);
}

#[test]
fn empty_cache_syncs_from_the_lookback_window() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let clock = ManualClock::new(now);
    let table = InMemoryTable::with_clock(Arc::new(clock.clone()));
    let repo = Repository::new(
        test_config(),
        Arc::new(MemoryConnector::new(table.clone())),
        Arc::new(clock),
    );
    repo.initialize(ENDPOINT, "Alice").wait_timeout(WAIT).unwrap();

    repo.sync_now().wait_timeout(WAIT).unwrap();

    let expected = TimestampFilter::after(now - chrono::Duration::minutes(10)).to_odata();
    assert_eq!(table.filters().last().cloned().flatten(), Some(expected));
}

#[test]
fn sync_watermark_follows_the_newest_cached_entry() {
    let table = InMemoryTable::new();
    table.seed(UnlockedItem::new(1, "Bronze dagger", "Bob"));
    let newest = table.seed(UnlockedItem::new(2, "Iron dagger", "Bob"));
    let repo = ready_repository(&table, "Alice");

    let from_others = repo.sync_now().wait_timeout(WAIT).unwrap();

    assert!(from_others.is_empty(), "nothing newer than the watermark");
    let expected = TimestampFilter::after(newest.acquired_on().unwrap()).to_odata();
    assert_eq!(table.filters().last().cloned().flatten(), Some(expected));
}

#[test]
fn failed_sync_is_not_an_error() {
    let table = InMemoryTable::new();
    let repo = ready_repository(&table, "Alice");
    table.fail_next(LedgerError::Transport {
        status: 500,
        body: "InternalError".to_string(),
    });

    let from_others = repo.sync_now().wait_timeout(WAIT).unwrap();

    assert!(from_others.is_empty());
    assert!(repo.is_ready());
}

#[test]
fn periodic_sync_picks_up_other_members() {
    let table = InMemoryTable::new();
    let config = LedgerConfig {
        poll_interval_ms: 5,
        sync_period_secs: 1,
        ..LedgerConfig::default()
    };
    let repo = Repository::new(
        config,
        Arc::new(MemoryConnector::new(table.clone())),
        Arc::new(SystemClock),
    );
    repo.initialize(ENDPOINT, "Alice").wait_timeout(WAIT).unwrap();
    let seen = record_items(&repo);

    table.seed(UnlockedItem::new(4151, "Abyssal whip", "Bob"));

    let deadline = std::time::Instant::now() + WAIT;
    while seen.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(*seen.lock().unwrap(), vec![vec![4151]]);
    assert!(repo.has_item(4151));
}

#[test]
fn removed_item_listener_is_not_called() {
    let table = InMemoryTable::new();
    let repo = ready_repository(&table, "Alice");
    let calls = Arc::new(Mutex::new(0));

    let counter = calls.clone();
    let id = repo.add_item_listener(move |_| *counter.lock().unwrap() += 1);
    assert!(repo.remove_item_listener(id));

    repo.insert_item(repo.create_new_item(995, "Coins"))
        .wait_timeout(WAIT)
        .unwrap();
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn results_can_be_awaited() {
    let table = InMemoryTable::new();
    let repo = repository(&table);

    repo.initialize(ENDPOINT, "Alice").await.unwrap();
    let item = repo.insert_item(repo.create_new_item(995, "Coins")).await.unwrap();

    assert_eq!(item.acquired_by(), "Alice");
}
