//! Single-assignment results handed back to callers.
//!
//! Every submitted operation returns a `Pending<T>` immediately. It can be
//! awaited from async code or waited on from a plain thread; the matching
//! `Completer<T>` is resolved exactly once by whoever finishes the work.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::ledger::error::{LedgerError, Result};

const DROPPED: &str = "operation dropped before completion";
const NO_RUNTIME: &str = "could not start a timer to wait on";

pub fn channel<T>() -> (Completer<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, Pending { rx })
}

#[derive(Debug)]
pub struct Completer<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Completer<T> {
    /// Resolves the paired `Pending`. A caller that stopped listening is not an error.
    pub fn complete(self, result: Result<T>) {
        let _ = self.tx.send(result);
    }
}

#[derive(Debug)]
#[must_use = "a Pending does nothing unless awaited or waited on"]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Pending<T> {
    /// An already resolved result.
    pub fn ready(result: Result<T>) -> Self {
        let (completer, pending) = channel();
        completer.complete(result);
        pending
    }

    /// Blocks the current thread until the result is available.
    ///
    /// Must not be called from within an async runtime; `.await` instead.
    pub fn wait(self) -> Result<T> {
        self.rx
            .blocking_recv()
            .unwrap_or(Err(LedgerError::Closed(DROPPED)))
    }

    /// Like [`Pending::wait`] but gives up after `timeout`.
    ///
    /// Same restriction as `wait`: not from within an async runtime.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|_| LedgerError::Closed(NO_RUNTIME))?;

        runtime
            .block_on(tokio::time::timeout(timeout, self))
            .unwrap_or(Err(LedgerError::Timeout))
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(LedgerError::Closed(DROPPED))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_resolves_immediately() {
        let pending = Pending::ready(Ok(7));
        assert_eq!(pending.wait().unwrap(), 7);
    }

    #[test]
    fn dropped_completer_reads_as_closed() {
        let (completer, pending) = channel::<()>();
        drop(completer);
        assert!(pending.wait().unwrap_err().is_closed());
    }

    #[test]
    fn wait_timeout_expires() {
        let (_completer, pending) = channel::<()>();
        let err = pending.wait_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, LedgerError::Timeout));
    }

    #[test]
    fn wait_timeout_returns_a_late_result() {
        let (completer, pending) = channel();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completer.complete(Ok(42));
        });
        assert_eq!(pending.wait_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[tokio::test]
    async fn completes_across_threads() {
        let (completer, pending) = channel();
        std::thread::spawn(move || completer.complete(Ok("done")));
        assert_eq!(pending.await.unwrap(), "done");
    }
}
