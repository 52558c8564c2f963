//! Coalescing background rebuilder.
//!
//! One long-lived task per built-in provider. It runs the rebuild closure
//! on every `trigger()` and at least once per `max_age` window. Triggers
//! arriving while a rebuild is in flight collapse into a single pending
//! run (`Notify` holds at most one permit). `close()` cancels the task.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Rebuilder {
    notify: Arc<Notify>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Rebuilder {
    /// Spawn the worker. `rebuild` must be cheap enough to run inline on
    /// the task (it rematerializes an in-memory view; no network).
    pub fn spawn<F>(name: &'static str, max_age: Duration, rebuild: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let task_notify = notify.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = task_notify.notified() => {}
                    _ = tokio::time::sleep(max_age) => {}
                }
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(&rebuild));
                if outcome.is_err() {
                    tracing::error!(worker = name, "rebuild panicked");
                }
            }
            tracing::debug!(worker = name, "rebuilder stopped");
        });

        Self {
            notify,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Request a rebuild. Safe to call from any thread, any number of
    /// times; concurrent requests coalesce.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Stop the worker and wait for it to exit.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
