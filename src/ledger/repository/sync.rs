use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Background timer that fires `tick` every `period` until stopped.
///
/// `tick` returns `false` to end the loop on its own, which the repository
/// uses once it has been dropped.
pub(crate) struct SyncScheduler {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    pub(crate) fn start<F>(period: Duration, tick: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        let (stop, stopped) = mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name("ledger-sync".to_string())
            .spawn(move || {
                log::debug!("[SYNC] scheduler started, period {:?}", period);
                loop {
                    match stopped.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {
                            if !tick() {
                                break;
                            }
                        }
                        // Stop requested or the scheduler handle went away.
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("[SYNC] scheduler stopped");
            });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("[SYNC] failed to start scheduler thread: {}", e);
                None
            }
        };

        Self {
            stop: Some(stop),
            handle,
        }
    }

    /// Stops the timer. A tick already running is allowed to finish.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::error!("[SYNC] scheduler thread panicked");
            }
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
