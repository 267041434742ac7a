//! Connection lifecycle of a repository.
//!
//! ```text
//! NOT_INITIALIZED -> INITIALIZING -> LOADING_DATA -> READY
//!        any step ----------------------------------> ERROR
//!        reset() from anywhere ---------------------> NOT_INITIALIZED
//! ```
//!
//! Transitions are broadcast synchronously to every registered listener. The
//! repository uses this to swap the queue's execution context.

use std::fmt;

use parking_lot::Mutex;

use crate::ledger::listeners::{ListenerId, ListenerSet};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    NotInitialized,
    Initializing,
    LoadingData,
    Ready,
    Error,
}

impl ConnectionState {
    pub fn display_name(&self) -> &'static str {
        match self {
            ConnectionState::NotInitialized => "Not initialized",
            ConnectionState::Initializing => "Connecting to database...",
            ConnectionState::LoadingData => "Loading unlocked items...",
            ConnectionState::Ready => "Ready",
            ConnectionState::Error => "Connection failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        *self == ConnectionState::Ready
    }

    pub fn can_accept_actions(&self) -> bool {
        !matches!(self, ConnectionState::NotInitialized | ConnectionState::Error)
    }

    /// Forward steps and failures only; going back requires a reset.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Error, Error) => false,
            (_, Error) => true,
            (NotInitialized, Initializing) => true,
            (Initializing, LoadingData) => true,
            (LoadingData, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

pub struct StateMachine {
    current: Mutex<ConnectionState>,
    last_error: Mutex<Option<String>>,
    listeners: ListenerSet<ConnectionState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(ConnectionState::NotInitialized),
            last_error: Mutex::new(None),
            listeners: ListenerSet::new("state"),
        }
    }

    pub fn current(&self) -> ConnectionState {
        *self.current.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_ready()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Moves to `next` if the lifecycle allows it. Returns whether it did.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let previous = {
            let mut current = self.current.lock();
            let previous = *current;
            if !previous.can_transition_to(next) {
                log::warn!("[STATE] refusing transition {:?} -> {:?}", previous, next);
                return false;
            }
            *current = next;
            previous
        };

        if next != ConnectionState::Error {
            *self.last_error.lock() = None;
        }

        log::debug!("[STATE] {:?} -> {:?}", previous, next);
        self.listeners.notify(&next);
        true
    }

    /// Moves to ERROR and remembers why.
    pub fn fail(&self, error: impl Into<String>) -> bool {
        let error = error.into();
        log::error!("[STATE] failed: {}", error);
        *self.last_error.lock() = Some(error);
        self.transition(ConnectionState::Error)
    }

    /// Unconditionally back to NOT_INITIALIZED.
    pub fn reset(&self) {
        let previous = std::mem::replace(&mut *self.current.lock(), ConnectionState::NotInitialized);
        *self.last_error.lock() = None;

        if previous != ConnectionState::NotInitialized {
            log::debug!("[STATE] {:?} -> NotInitialized (reset)", previous);
            self.listeners.notify(&ConnectionState::NotInitialized);
        }
    }

    /// Registers a listener and immediately hands it the current state.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        let current = self.current();
        listener(&current);
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}
