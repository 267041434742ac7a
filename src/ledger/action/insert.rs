use crate::ledger::action::{Action, ExecutionContext, PendingChange};
use crate::ledger::domain::UnlockedItem;
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::types::ActionKind;

/// What an insert ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    /// The ledger entry now cached for the item id.
    pub item: UnlockedItem,
    /// False when the item was already unlocked and nothing was written.
    pub inserted: bool,
}

/// Records an item as unlocked by the current user.
///
/// The cache is checked and written under one lock, so two inserts of the
/// same id never both reach the remote store from this process.
pub struct InsertItemAction {
    item: UnlockedItem,
}

impl InsertItemAction {
    pub fn new(item: UnlockedItem) -> Self {
        Self { item }
    }
}

impl Action for InsertItemAction {
    type Output = InsertOutcome;

    fn kind(&self) -> ActionKind {
        ActionKind::Insert
    }

    fn description(&self) -> String {
        format!(
            "insert item {} ({})",
            self.item.item_id(),
            self.item.item_name()
        )
    }

    fn execute(&mut self, ctx: &ExecutionContext) -> Result<InsertOutcome> {
        let api = ctx.api()?;

        let change = {
            let mut items = ctx.cache().lock();
            if let Some(existing) = items.get(&self.item.item_id()) {
                log::debug!(
                    "[ACTION] item {} already unlocked by {}",
                    existing.item_id(),
                    existing.acquired_by()
                );
                return Ok(InsertOutcome {
                    item: existing.clone(),
                    inserted: false,
                });
            }

            self.item.set_acquired_by(ctx.current_user());
            PendingChange::put(&mut items, self.item.clone())
        };

        match api.insert_entity(&self.item) {
            Ok(()) => {
                log::info!(
                    "[ACTION] unlocked item {} for {}",
                    self.item.item_id(),
                    self.item.acquired_by()
                );
                Ok(InsertOutcome {
                    item: self.item.clone(),
                    inserted: true,
                })
            }
            Err(e) => {
                change.rollback(ctx.cache());
                Err(LedgerError::remote("insert item into", e))
            }
        }
    }
}
