//! Cleanup sweeper.
//!
//! A long-lived task that hard-deletes soft-deleted bundles once their
//! grace window expires and they are still empty. Runs on an interval and
//! on kicks from `delete_skill_bundle`. Each sweep runs on its own task so
//! a panic is contained and the loop keeps going.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use curio_domain::error::Result;
use curio_domain::trace::TraceEvent;

use crate::store::StoreInner;

pub(crate) struct Sweeper {
    notify: Arc<Notify>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Sweeper {
    pub fn spawn(inner: Arc<StoreInner>) -> Self {
        let notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let interval = Duration::from_secs(inner.opts.sweep_interval_secs);

        let task_notify = notify.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = task_notify.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                }

                let sweep_inner = inner.clone();
                match tokio::spawn(async move { sweep_once(&sweep_inner).await }).await {
                    Ok(Ok(0)) => {}
                    Ok(Ok(removed)) => {
                        tracing::info!(removed, "sweeper hard-deleted expired bundles");
                    }
                    Ok(Err(e)) => tracing::warn!(error = %e, "sweep failed"),
                    Err(join_err) => tracing::error!(error = %join_err, "sweep panicked"),
                }
            }
            tracing::debug!("sweeper stopped");
        });

        Self {
            notify,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn kick(&self) {
        self.notify.notify_one();
    }

    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// One sweep under the usual writer discipline. Returns how many bundles
/// were hard-deleted.
pub(crate) async fn sweep_once(inner: &Arc<StoreInner>) -> Result<usize> {
    let _w = inner.write_mu.lock().await;
    let sc = inner.user.get_all(false)?;
    let cutoff = Utc::now() - chrono::Duration::seconds(inner.opts.soft_delete_grace_secs as i64);

    let expired: Vec<String> = sc
        .bundles
        .iter()
        .filter(|(id, b)| {
            b.soft_deleted_at.is_some_and(|t| t <= cutoff)
                && sc.skills.get(*id).map_or(true, |m| m.is_empty())
        })
        .map(|(id, _)| id.clone())
        .collect();
    if expired.is_empty() {
        return Ok(0);
    }

    let mut next = (*sc).clone();
    for id in &expired {
        next.bundles.remove(id);
        next.skills.remove(id);
    }
    inner.commit(next)?;
    for id in &expired {
        TraceEvent::BundleSwept {
            bundle_id: id.clone(),
        }
        .emit();
    }
    Ok(expired.len())
}
