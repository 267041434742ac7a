//! Units of deferred work run by the action queue.
//!
//! An action describes one remote operation together with the local cache
//! bookkeeping around it. Actions never run on the caller's thread: they are
//! queued, and the single queue worker executes them one at a time against
//! the `ExecutionContext` current at the start of its batch.

mod change;
mod delete;
mod insert;
mod load_all;
mod sync;


use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::ledger::cache::ItemCache;
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::table::api::TableApi;
use crate::ledger::types::{ActionKind, NORMAL_PRIORITY};

pub use change::PendingChange;
pub use delete::DeleteItemAction;
pub use insert::{InsertItemAction, InsertOutcome};
pub use load_all::LoadAllItemsAction;
pub use sync::SyncAction;

/// Everything an action may touch while executing.
///
/// The repository rebuilds and swaps this whenever the connection state
/// changes; a running batch keeps the snapshot it started with.
#[derive(Clone)]
pub struct ExecutionContext {
    api: Option<Arc<dyn TableApi>>,
    cache: ItemCache,
    current_user: Option<String>,
    ready: bool,
}

impl ExecutionContext {
    pub fn new(
        api: Option<Arc<dyn TableApi>>,
        cache: ItemCache,
        current_user: Option<String>,
        ready: bool,
    ) -> Self {
        Self {
            api,
            cache,
            current_user,
            ready,
        }
    }

    pub fn has_api(&self) -> bool {
        self.api.is_some()
    }

    pub fn api(&self) -> Result<&dyn TableApi> {
        self.api
            .as_deref()
            .ok_or(LedgerError::Closed("no table client connected"))
    }

    pub fn cache(&self) -> &ItemCache {
        &self.cache
    }

    pub fn current_user(&self) -> &str {
        self.current_user.as_deref().unwrap_or("")
    }

    /// Ready for regular work: connected, loaded, and attributed to someone.
    pub fn is_ready(&self) -> bool {
        self.ready && self.api.is_some() && !self.current_user().is_empty()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("api", &self.api.is_some())
            .field("cached_items", &self.cache.len())
            .field("current_user", &self.current_user)
            .field("ready", &self.ready)
            .finish()
    }
}

/// A queued operation producing `Output`.
pub trait Action: Send + 'static {
    type Output: Send + 'static;

    fn kind(&self) -> ActionKind;

    fn description(&self) -> String;

    fn execute(&mut self, ctx: &ExecutionContext) -> Result<Self::Output>;

    /// Whether the action may run against `ctx`. Defaults to a ready context.
    fn can_execute(&self, ctx: &ExecutionContext) -> bool {
        ctx.is_ready()
    }

    /// Higher runs first within a batch.
    fn priority(&self) -> i32 {
        NORMAL_PRIORITY
    }
}

pub(crate) type Completion<T> = Box<dyn FnOnce(Result<T>) + Send>;

/// Type-erased action plus the callback that receives its result.
pub(crate) trait Job: Send {
    fn kind(&self) -> ActionKind;
    fn description(&self) -> String;
    fn priority(&self) -> i32;
    fn can_execute(&self, ctx: &ExecutionContext) -> bool;

    /// Executes and completes. Consumes the job so completion happens once.
    fn run(self: Box<Self>, ctx: &ExecutionContext);

    /// Completes with `error` without executing.
    fn cancel(self: Box<Self>, error: LedgerError);
}

pub(crate) struct Queued<A: Action> {
    action: A,
    completion: Completion<A::Output>,
}

impl<A: Action> Queued<A> {
    pub(crate) fn new(action: A, completion: Completion<A::Output>) -> Self {
        Self { action, completion }
    }
}

impl<A: Action> Job for Queued<A> {
    fn kind(&self) -> ActionKind {
        self.action.kind()
    }

    fn description(&self) -> String {
        self.action.description()
    }

    fn priority(&self) -> i32 {
        self.action.priority()
    }

    fn can_execute(&self, ctx: &ExecutionContext) -> bool {
        self.action.can_execute(ctx)
    }

    fn run(self: Box<Self>, ctx: &ExecutionContext) {
        let Queued {
            mut action,
            completion,
        } = *self;
        let kind = action.kind();

        log::debug!("[ACTION] executing: {}", action.description());
        let result = match catch_unwind(AssertUnwindSafe(|| action.execute(ctx))) {
            Ok(result) => result,
            Err(panic) => Err(LedgerError::ActionPanicked(kind, panic_message(panic.as_ref()))),
        };

        match &result {
            Ok(_) => log::debug!("[ACTION] {} completed", kind),
            Err(e) => log::error!("[ACTION] {} failed: {}", kind, e),
        }

        completion(result);
    }

    fn cancel(self: Box<Self>, error: LedgerError) {
        log::warn!("[ACTION] {} cancelled: {}", self.action.kind(), error);
        (self.completion)(Err(error));
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
