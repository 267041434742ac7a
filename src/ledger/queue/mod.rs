//! Serialized execution of ledger actions.
//!
//! One worker thread drains the queue. Callers on any thread only push work
//! and receive a `Pending` back; every remote call happens on the worker, one
//! at a time, so cache read-modify-writes never race with each other.


use std::cmp::Reverse;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::config::LedgerConfig;
use crate::ledger::action::{Action, ExecutionContext, Job, Queued};
use crate::ledger::error::{LedgerError, Result};
use crate::ledger::pending::{self, Pending};

/// Shared between the handle and the worker thread.
struct Shared {
    pending: Mutex<VecDeque<Box<dyn Job>>>,
    context: RwLock<Option<Arc<ExecutionContext>>>,
    processing: AtomicBool,
    shutdown: AtomicBool,
    batch_size: usize,
}

pub struct ActionQueue {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ActionQueue {
    /// Starts the worker thread.
    pub fn new(poll_interval: Duration, batch_size: usize) -> Self {
        let shared = Arc::new(Shared::new(batch_size));

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("ledger-action-queue".to_string())
            .spawn(move || worker_shared.run(poll_interval));

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("[QUEUE] failed to start worker thread: {}", e);
                None
            }
        };

        Self { shared, worker }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.poll_interval(), config.batch_size)
    }

    /// A queue without a worker; work only runs on explicit `tick` calls.
    #[cfg(test)]
    pub(crate) fn manual(batch_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared::new(batch_size)),
            worker: None,
        }
    }

    /// Enqueues `action` and returns a handle to its eventual result.
    pub fn submit<A: Action>(&self, action: A) -> Pending<A::Output> {
        let (completer, pending) = pending::channel();
        self.submit_with(action, move |result| completer.complete(result));
        pending
    }

    /// Enqueues `action`; `completion` runs on the worker with the result.
    pub(crate) fn submit_with<A, F>(&self, action: A, completion: F)
    where
        A: Action,
        F: FnOnce(Result<A::Output>) + Send + 'static,
    {
        let job: Box<dyn Job> = Box::new(Queued::new(action, Box::new(completion)));

        if self.shared.shutdown.load(Ordering::Acquire) {
            job.cancel(LedgerError::Closed("queue shut down"));
            return;
        }

        log::debug!("[QUEUE] enqueued: {}", job.description());
        self.shared.pending.lock().push_back(job);
    }

    /// Installs the context used from the next tick on.
    pub fn update_context(&self, ctx: ExecutionContext) {
        log::debug!("[QUEUE] context updated: {:?}", ctx);
        *self.shared.context.write() = Some(Arc::new(ctx));
    }

    /// Drops the context and rejects every queued action.
    ///
    /// A batch already running finishes with the context it started with.
    pub fn clear(&self) {
        *self.shared.context.write() = None;
        let rejected = self.shared.cancel_all("queue cleared");
        if rejected > 0 {
            log::info!("[QUEUE] cleared {} pending actions", rejected);
        }
    }

    pub fn len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.pending.lock().is_empty()
    }

    pub fn has_context(&self) -> bool {
        self.shared.context.read().is_some()
    }

    /// Runs one batch. Returns how many actions executed.
    pub(crate) fn tick(&self) -> usize {
        self.shared.tick()
    }
}

impl Drop for ActionQueue {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);

        if let Some(worker) = self.worker.take() {
            // The last handle can be dropped from a completion running on the worker itself.
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                log::error!("[QUEUE] worker thread panicked");
            }
        }

        self.shared.cancel_all("queue shut down");
    }
}

impl Shared {
    fn new(batch_size: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            context: RwLock::new(None),
            processing: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            batch_size: batch_size.max(1),
        }
    }

    fn run(&self, poll_interval: Duration) {
        log::debug!("[QUEUE] worker started");
        while !self.shutdown.load(Ordering::Acquire) {
            self.tick();
            thread::sleep(poll_interval);
        }
        log::debug!("[QUEUE] worker stopped");
    }

    fn tick(&self) -> usize {
        if self.processing.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let _processing = ProcessingGuard(&self.processing);

        let Some(ctx) = self.context.read().clone() else {
            return 0;
        };

        let batch = self.collect_batch(&ctx);
        if batch.is_empty() {
            return 0;
        }

        log::trace!("[QUEUE] running batch of {}", batch.len());
        let executed = batch.len();
        for job in batch {
            job.run(&ctx);
        }
        executed
    }

    /// Takes executable actions from the head, highest priority first.
    ///
    /// The first action that cannot run yet goes back to the tail and ends
    /// the batch, so one parked action never blocks the others forever.
    fn collect_batch(&self, ctx: &ExecutionContext) -> Vec<Box<dyn Job>> {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut pending = self.pending.lock();

        while batch.len() < self.batch_size {
            let Some(job) = pending.pop_front() else {
                break;
            };

            if job.can_execute(ctx) {
                batch.push(job);
            } else {
                log::trace!("[QUEUE] parking: {}", job.description());
                pending.push_back(job);
                break;
            }
        }
        drop(pending);

        batch.sort_by_key(|job| Reverse(job.priority()));
        batch
    }

    /// Rejects everything queued with `LedgerError::Closed(reason)`.
    fn cancel_all(&self, reason: &'static str) -> usize {
        let drained: Vec<_> = self.pending.lock().drain(..).collect();
        let count = drained.len();
        for job in drained {
            job.cancel(LedgerError::Closed(reason));
        }
        count
    }
}

struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
