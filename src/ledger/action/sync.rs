use chrono::{DateTime, Utc};

use crate::ledger::action::{Action, ExecutionContext};
use crate::ledger::domain::UnlockedItem;
use crate::ledger::error::Result;
use crate::ledger::table::filter::TimestampFilter;
use crate::ledger::types::{ActionKind, SYNC_PRIORITY};

/// Pulls entries written after `since` into the cache.
///
/// Returns the entries attributed to someone other than `current_user`, so
/// the repository can announce other members' unlocks. A failed sync is
/// logged and yields nothing; the next period retries from the same
/// watermark.
pub struct SyncAction {
    since: DateTime<Utc>,
    current_user: String,
}

impl SyncAction {
    pub fn new(since: DateTime<Utc>, current_user: impl Into<String>) -> Self {
        Self {
            since,
            current_user: current_user.into(),
        }
    }
}

impl Action for SyncAction {
    type Output = Vec<UnlockedItem>;

    fn kind(&self) -> ActionKind {
        ActionKind::Sync
    }

    fn description(&self) -> String {
        format!("sync changes since {}", self.since)
    }

    fn priority(&self) -> i32 {
        SYNC_PRIORITY
    }

    fn execute(&mut self, ctx: &ExecutionContext) -> Result<Vec<UnlockedItem>> {
        let filter = TimestampFilter::after(self.since).to_odata();
        let changed = match ctx.api()?.list_entities(Some(&filter)) {
            Ok(changed) => changed,
            Err(e) => {
                log::warn!("[SYNC] sync failed, will retry next period: {}", e);
                return Ok(Vec::new());
            }
        };

        let mut from_others = Vec::new();
        {
            let mut items = ctx.cache().lock();
            for item in changed {
                if item.acquired_by() != self.current_user {
                    from_others.push(item.clone());
                }
                items.insert(item.item_id(), item);
            }
        }

        if !from_others.is_empty() {
            log::info!("[SYNC] {} new unlocks from other members", from_others.len());
        }
        Ok(from_others)
    }
}
