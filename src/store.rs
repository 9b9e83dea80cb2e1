//! # Store Core Facade
//!
//! [`StoreCore`] is the public entry point: it owns one write pipeline
//! (dispatcher → builders → batcher → applier), the per-key lock table, and
//! the backend handle, and exposes the fire-and-forget `put` plus the
//! unsynchronized read path.
//!
//! ```text
//!  put(key, value) ──▶ intake channel (unbounded)
//!                          │ dispatcher: lock ticket per request, in order
//!                          ▼
//!                    build tasks ──▶ op channel ──▶ batcher ──▶ batch
//!                    (concurrent      (non-NoOp      (debounce   channel
//!                     across keys)     ops only)      + cap)       │
//!                                                                  ▼
//!                                                              applier ──▶ backend
//!                                                              (atomic apply,
//!                                                               release locks)
//!
//!  get_once / get_all_once ───────────────────────────────────▶ backend
//!  (caller's context, unsynchronized with in-flight puts)
//! ```
//!
//! Reads observe whatever backend state exists at query time: a `get_once`
//! racing an unresolved `put` for the same key returns either the pre-write
//! or the post-write value, never a partial batch (the backend applies
//! atomically), and which of the two is unspecified.

use std::mem;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::applier::{run_applier, ApplyFailurePolicy};
use crate::backend::StoreBackend;
use crate::batcher::run_batcher;
use crate::builder::{run_dispatcher, PutRequest};
use crate::error::{Error, Result};
use crate::lock::KeyLocker;

// =============================================================================
// Configuration
// =============================================================================

/// Default quiet period before a non-full window seals, in milliseconds.
///
/// Long enough to coalesce a burst of writes into one backend transaction,
/// short enough that a lone write is not held back noticeably.
pub const DEFAULT_GROUPING_TIMEOUT_MS: u64 = 100;

/// Default maximum operations per batch.
///
/// Keeps the encoded batch payload under typical transactional size
/// ceilings; raise or lower it to match the backend's limit.
pub const DEFAULT_GROUP_MAX_SIZE: usize = 30;

/// Capacity of the builder → batcher operation channel.
const OP_CHANNEL_SIZE: usize = 4096;

/// Capacity of the batcher → applier channel. Small on purpose: sealed
/// batches queue briefly while one apply is in flight, and backpressure
/// beyond that belongs in the window, not in a deep queue of stale batches.
const BATCH_CHANNEL_SIZE: usize = 16;

/// Configuration for a store core's write pipeline.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Quiet period that seals a non-full window (debounce). Latency-
    /// sensitive writers can set this near zero to trade batch size for
    /// responsiveness.
    pub grouping_timeout: Duration,

    /// Maximum operations per batch; a full window seals immediately.
    pub group_max_size: usize,

    /// What to do with a failed batch's key locks. See
    /// [`ApplyFailurePolicy`].
    pub on_apply_failure: ApplyFailurePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            grouping_timeout: Duration::from_millis(DEFAULT_GROUPING_TIMEOUT_MS),
            group_max_size: DEFAULT_GROUP_MAX_SIZE,
            on_apply_failure: ApplyFailurePolicy::default(),
        }
    }
}

// =============================================================================
// Store Core
// =============================================================================

/// Write-coalescing store core over a transactional backend.
///
/// Cheaply cloneable; all clones share one pipeline, lock table, and
/// backend. Construct it from within a Tokio runtime; the pipeline tasks
/// are spawned at construction time.
pub struct StoreCore<B: StoreBackend> {
    inner: Arc<Inner<B>>,
}

struct Inner<B: StoreBackend> {
    backend: Arc<B>,
    put_tx: StdMutex<Option<mpsc::UnboundedSender<PutRequest<B::Key, B::Value>>>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl<B: StoreBackend> Clone for StoreCore<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: StoreBackend> StoreCore<B> {
    /// Creates a store core with default configuration and the default
    /// "new value wins" merge policy.
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    /// Creates a store core with the given configuration and the default
    /// "new value wins" merge policy.
    pub fn with_config(backend: B, config: StoreConfig) -> Self {
        Self::with_merge(backend, config, |_, new: &B::Value| new.clone())
    }

    /// Creates a store core with a custom merge strategy
    /// `(current, incoming) -> merged`, e.g. a field-level union for
    /// partial records.
    pub fn with_merge(
        backend: B,
        config: StoreConfig,
        merge: impl Fn(&B::Value, &B::Value) -> B::Value + Send + Sync + 'static,
    ) -> Self {
        let backend = Arc::new(backend);
        let locker = Arc::new(KeyLocker::new());

        let (put_tx, put_rx) = mpsc::unbounded_channel();
        let (ops_tx, ops_rx) = mpsc::channel(OP_CHANNEL_SIZE);
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_CHANNEL_SIZE);

        let dispatcher = tokio::spawn(run_dispatcher(
            Arc::clone(&backend),
            Arc::clone(&locker),
            Arc::new(merge),
            put_rx,
            ops_tx,
        ));
        let batcher = tokio::spawn(run_batcher(
            ops_rx,
            batch_tx,
            config.grouping_timeout,
            config.group_max_size,
        ));
        let applier = tokio::spawn(run_applier(
            Arc::clone(&backend),
            locker,
            batch_rx,
            config.on_apply_failure,
        ));

        Self {
            inner: Arc::new(Inner {
                backend,
                put_tx: StdMutex::new(Some(put_tx)),
                tasks: StdMutex::new(vec![dispatcher, batcher, applier]),
            }),
        }
    }

    /// Enqueues an upsert of `value` at `key` and returns immediately.
    ///
    /// The write resolves asynchronously: the pipeline serializes it against
    /// other writes to the same key, skips it entirely if it would change
    /// nothing, and applies it as part of an atomic batch. Failures past
    /// this point are logged, never returned; there is no caller left to
    /// return them to.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] if the store has shut down.
    pub fn put(&self, key: B::Key, value: B::Value) -> Result<()> {
        let guard = self.inner.put_tx.lock().expect("intake lock poisoned");
        let put_tx = guard.as_ref().ok_or(Error::Closed)?;
        put_tx
            .send(PutRequest { key, value })
            .map_err(|_| Error::Closed)
    }

    /// Reads the current value at `key`, unsynchronized with in-flight
    /// writes.
    ///
    /// Returns `Ok(None)` when no row exists. If the backend anomalously
    /// returns more than one row, the first is returned and a warning is
    /// logged.
    pub async fn get_once(&self, key: &B::Key) -> Result<Option<B::Value>> {
        let mut rows = self.inner.backend.query(key).await?;
        if rows.len() > 1 {
            warn!(key = ?key, rows = rows.len(), "multiple rows in a single-item get");
        }
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.swap_remove(0)))
        }
    }

    /// Reads every value matching `selector`, preserving backend result
    /// order; empty when nothing matches. Unsynchronized with in-flight
    /// writes, like [`get_once`](Self::get_once).
    pub async fn get_all_once(&self, selector: &B::Selector) -> Result<Vec<B::Value>> {
        self.inner.backend.query_all(selector).await
    }

    /// Registers for the backend's change notifications.
    ///
    /// Pass-through registration only; reacting to the notifications is the
    /// surrounding store's responsibility.
    pub fn changes(&self) -> broadcast::Receiver<B::Key> {
        self.inner.backend.changes()
    }

    /// The backend collaborator.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Shuts the pipeline down: stop accepting puts, let in-flight builds
    /// resolve, flush the final window, drain the applier, then join the
    /// pipeline tasks.
    ///
    /// Affects every clone of this core. Subsequent [`put`](Self::put)
    /// calls fail with [`Error::Closed`]; the read path keeps working.
    /// If a failed batch left keys locked under
    /// [`ApplyFailurePolicy::HoldLocks`], builds waiting on those keys can
    /// never resolve and this call will not return.
    pub async fn shutdown(&self) {
        let put_tx = self.inner.put_tx.lock().expect("intake lock poisoned").take();
        drop(put_tx);

        let tasks = mem::take(&mut *self.inner.tasks.lock().expect("task list poisoned"));
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl<B: StoreBackend> std::fmt::Debug for StoreCore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let closed = self
            .inner
            .put_tx
            .lock()
            .expect("intake lock poisoned")
            .is_none();
        f.debug_struct("StoreCore").field("closed", &closed).finish()
    }
}
