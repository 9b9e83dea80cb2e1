//! # Operation Builder
//!
//! First stage of the write pipeline. The intake dispatcher drains the
//! unbounded `put` channel in arrival order; for each request it registers a
//! lock ticket for the key *before* spawning the build task, so two requests
//! for the same key are granted in submission order while different keys
//! build concurrently.
//!
//! A build task turns `(key, value)` into a [`PendingOp`] against current
//! backend state:
//!
//! 1. Await the lock ticket.
//! 2. Query the backend for the key's current row.
//! 3. Absent → `Insert`; the lock stays held and travels with the batch.
//! 4. Present → merge (default: new value wins). Merged == current →
//!    `NoOp`, release the lock immediately. Otherwise → `Update`, lock held.
//!
//! Any query failure downgrades the build to a no-op and releases the lock:
//! a failed build never leaves a key locked, and `put` callers never observe
//! it (the call already returned).

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::backend::StoreBackend;
use crate::lock::{KeyLocker, Ticket};
use crate::types::{MergeFn, PendingOp, WriteOp};

/// One enqueued `put` request.
#[derive(Debug)]
pub(crate) struct PutRequest<K, V> {
    pub key: K,
    pub value: V,
}

/// Drains the intake channel, registering lock tickets in arrival order and
/// spawning one build task per request. Exits when the intake channel closes;
/// in-flight build tasks keep their clone of `ops_tx` alive until they
/// resolve, so the downstream channel closes only once the stage has drained.
pub(crate) async fn run_dispatcher<B: StoreBackend>(
    backend: Arc<B>,
    locker: Arc<KeyLocker<B::Key>>,
    merge: MergeFn<B::Value>,
    mut intake: mpsc::UnboundedReceiver<PutRequest<B::Key, B::Value>>,
    ops_tx: mpsc::Sender<WriteOp<B::Key, B::Value>>,
) {
    while let Some(request) = intake.recv().await {
        // Ticket order is what serializes same-key requests; it must be
        // taken here, on the dispatcher, not inside the spawned task.
        let ticket = locker.enqueue(request.key.clone());

        let backend = Arc::clone(&backend);
        let locker = Arc::clone(&locker);
        let merge = Arc::clone(&merge);
        let ops_tx = ops_tx.clone();

        tokio::spawn(async move {
            let op = build_operation(&*backend, &locker, ticket, request, &merge).await;
            if let Some(op) = op {
                let key = op.key().clone();
                if ops_tx.send(op).await.is_err() {
                    // Batcher is gone (shutdown mid-flight); release rather
                    // than leak the key.
                    warn!(key = ?key, "batcher closed before accepting operation");
                    locker.release(&key);
                }
            }
        });
    }
}

/// Derives the pending operation for one request, holding the key's lock.
///
/// Returns the batchable operation, or `None` when the build resolved to a
/// no-op (lock already released).
async fn build_operation<B: StoreBackend>(
    backend: &B,
    locker: &KeyLocker<B::Key>,
    ticket: Ticket,
    request: PutRequest<B::Key, B::Value>,
    merge: &MergeFn<B::Value>,
) -> Option<WriteOp<B::Key, B::Value>> {
    ticket.granted().await;

    let PutRequest { key, value } = request;

    let rows = match backend.query(&key).await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(key = ?key, error = %err, "operation build failed, downgraded to no-op");
            locker.release(&key);
            return None;
        }
    };

    let op = match rows.into_iter().next() {
        None => {
            trace!(key = ?key, "creating insert operation");
            PendingOp::Insert { key, value }
        }
        Some(current) => {
            let merged = if value == current {
                value
            } else {
                (merge)(&current, &value)
            };

            if merged == current {
                PendingOp::NoOp { key }
            } else {
                trace!(key = ?key, "creating update operation");
                PendingOp::Update { key, value: merged }
            }
        }
    };

    if op.is_no_op() {
        trace!(key = ?op.key(), "value already current, releasing lock early");
        locker.release(op.key());
    }

    op.into_write_op()
}
