//! Shared unlock ledger synchronization.
//!
//! This module implements the client side of a group "bronzeman" ledger: an
//! append-only set of unlocked items shared by several independent clients
//! through a remote table.
//!
//! # Layout
//! * **domain**: the `UnlockedItem` record and its table wire format.
//! * **table**: the remote table contract (`TableApi`) plus the SAS-URL HTTP
//!   client and an in-memory table.
//! * **action**: units of deferred work executed against an `ExecutionContext`.
//! * **queue**: the single-consumer `ActionQueue` that runs actions one at a time.
//! * **state**: the connection lifecycle state machine.
//! * **repository**: the public facade tying it all together.

pub mod action;
pub mod cache;
pub mod clock;
pub mod domain;
pub mod error;
pub mod listeners;
pub mod pending;
pub mod queue;
pub mod repository;
pub mod state;
pub mod table;
pub mod types;

pub use crate::ledger::domain::{ItemId, UnlockedItem, PARTITION_KEY};
pub use crate::ledger::error::{LedgerError, Result};
pub use crate::ledger::pending::Pending;
pub use crate::ledger::repository::Repository;
pub use crate::ledger::state::ConnectionState;
pub use crate::ledger::types::ActionKind;
