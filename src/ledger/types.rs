use std::fmt;

/// Priority of the initial bulk load. Always runs first within a batch.
pub const LOAD_ALL_PRIORITY: i32 = 100;

/// Priority of user-initiated inserts and deletes.
pub const NORMAL_PRIORITY: i32 = 0;

/// Priority of background reconciliation. Always runs last within a batch.
pub const SYNC_PRIORITY: i32 = -10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Insert,
    Delete,
    LoadAll,
    Sync,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Insert => "INSERT_ITEM",
            ActionKind::Delete => "DELETE_ITEM",
            ActionKind::LoadAll => "LOAD_ALL_ITEMS",
            ActionKind::Sync => "SYNC",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
