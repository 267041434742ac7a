use crate::ledger::action::{Action, ExecutionContext};
use crate::ledger::cache::ItemMap;
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::types::{ActionKind, LOAD_ALL_PRIORITY};

/// Fetches the whole ledger during initialization.
///
/// Runs before the repository is ready, so it only needs a connected client.
/// The result is handed back instead of written to the cache; the
/// repository installs it when it finishes initializing.
#[derive(Debug, Default)]
pub struct LoadAllItemsAction;

impl LoadAllItemsAction {
    pub fn new() -> Self {
        Self
    }
}

impl Action for LoadAllItemsAction {
    type Output = ItemMap;

    fn kind(&self) -> ActionKind {
        ActionKind::LoadAll
    }

    fn description(&self) -> String {
        "load all unlocked items".to_string()
    }

    fn can_execute(&self, ctx: &ExecutionContext) -> bool {
        ctx.has_api()
    }

    fn priority(&self) -> i32 {
        LOAD_ALL_PRIORITY
    }

    fn execute(&mut self, ctx: &ExecutionContext) -> Result<ItemMap> {
        let items = ctx
            .api()?
            .list_entities(None)
            .map_err(|e| LedgerError::remote("load items from", e))?;

        log::info!("[ACTION] loaded {} unlocked items", items.len());
        Ok(items.into_iter().map(|item| (item.item_id(), item)).collect())
    }
}
