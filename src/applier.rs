//! # Batch Applier
//!
//! Final stage of the write pipeline: submits each sealed batch to the
//! backend as one atomic apply call, then releases the locks of every key in
//! the batch.
//!
//! On apply failure the batch is dropped and the failure logged. There is
//! no retry, since the backend's partial-apply semantics are unknown and a
//! blind resubmit risks double application. What happens to the batch's key
//! locks is governed by [`ApplyFailurePolicy`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::backend::StoreBackend;
use crate::lock::KeyLocker;
use crate::types::Batch;

/// What to do with a failed batch's key locks.
///
/// The faithful-to-the-original default is [`HoldLocks`]: the keys stay
/// locked, so a later `put` for one of them never resolves. That surfaces
/// the failure loudly instead of risking double application, but it is a
/// real availability hazard; the error log is the only other signal.
/// Deployments that prefer availability can opt into [`ReleaseLocks`] and
/// accept that a racing `put` may rebuild against state the failed batch
/// never reached.
///
/// [`HoldLocks`]: ApplyFailurePolicy::HoldLocks
/// [`ReleaseLocks`]: ApplyFailurePolicy::ReleaseLocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyFailurePolicy {
    /// Keep the failed batch's keys locked.
    #[default]
    HoldLocks,
    /// Release the failed batch's keys; the dropped writes stay dropped.
    ReleaseLocks,
}

/// Applies sealed batches in FIFO order until the batch channel closes.
pub(crate) async fn run_applier<B: StoreBackend>(
    backend: Arc<B>,
    locker: Arc<KeyLocker<B::Key>>,
    mut batch_rx: mpsc::Receiver<Batch<B::Key, B::Value>>,
    policy: ApplyFailurePolicy,
) {
    while let Some(batch) = batch_rx.recv().await {
        let keys: Vec<B::Key> = batch.keys().cloned().collect();

        match backend.apply_batch(batch).await {
            Ok(()) => {
                debug!(ops = keys.len(), "applied batch");
                for key in &keys {
                    locker.release(key);
                }
            }
            Err(err) => {
                error!(ops = keys.len(), error = %err, "batch apply failed, batch dropped");
                if policy == ApplyFailurePolicy::ReleaseLocks {
                    for key in &keys {
                        locker.release(key);
                    }
                }
            }
        }
    }
}
