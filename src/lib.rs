pub mod config;
pub mod ledger;

pub use config::LedgerConfig;
pub use ledger::{
    ConnectionState,
    ItemId,
    LedgerError,
    Pending,
    Repository,
    UnlockedItem,
};
