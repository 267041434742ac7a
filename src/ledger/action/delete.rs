use crate::ledger::action::{Action, ExecutionContext, PendingChange};
use crate::ledger::domain::{ItemId, PARTITION_KEY};
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::types::ActionKind;

/// Removes an item from the ledger. Deleting an absent item succeeds.
pub struct DeleteItemAction {
    item_id: ItemId,
}

impl DeleteItemAction {
    pub fn new(item_id: ItemId) -> Self {
        Self { item_id }
    }
}

impl Action for DeleteItemAction {
    type Output = ();

    fn kind(&self) -> ActionKind {
        ActionKind::Delete
    }

    fn description(&self) -> String {
        format!("delete item {}", self.item_id)
    }

    fn execute(&mut self, ctx: &ExecutionContext) -> Result<()> {
        let api = ctx.api()?;
        let change = PendingChange::remove(&mut ctx.cache().lock(), self.item_id);

        match api.delete_entity(PARTITION_KEY, &self.item_id.to_string()) {
            Ok(()) => {
                log::info!("[ACTION] removed item {}", self.item_id);
                Ok(())
            }
            Err(e) => {
                change.rollback(ctx.cache());
                Err(LedgerError::remote("delete item from", e))
            }
        }
    }
}
