//! # In-Memory Backend
//!
//! [`MemoryBackend`] is a HashMap-based [`StoreBackend`] for tests and
//! embedding. Rows are held behind a `RwLock`; `apply_batch` takes the write
//! guard once for the whole batch, so readers observe either the pre-batch or
//! post-batch state and never a partially applied one.
//!
//! Each key maps to a *list* of rows. The pipeline itself maintains one row
//! per key, but backends in the wild can anomalously return several rows for
//! a single-record query, and the read path has to tolerate that; tests
//! seed the anomaly through [`seed_rows`](MemoryBackend::seed_rows).
//!
//! The backend also carries the instrumentation the integration suites need:
//! injectable apply failure, an optional per-batch operation ceiling
//! simulating the transactional payload limit, and insert/update/batch
//! counters.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::backend::StoreBackend;
use crate::error::{Error, Result};
use crate::types::{Batch, WriteOp};

/// Capacity of the change-notification channel.
const CHANGE_CHANNEL_SIZE: usize = 64;

/// Selector for [`MemoryBackend`] multi-record queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemorySelector<K> {
    /// All rows stored at one key.
    Key(K),
    /// Every row in the backend, ordered by key.
    All,
}

/// In-memory, HashMap-based store backend.
pub struct MemoryBackend<K, V> {
    rows: RwLock<HashMap<K, Vec<V>>>,
    changes: broadcast::Sender<K>,
    batch_limit: Option<usize>,
    fail_next: AtomicBool,
    fail_query: AtomicBool,
    inserts: AtomicUsize,
    updates: AtomicUsize,
    batches: AtomicUsize,
    attempts: AtomicUsize,
}

impl<K, V> MemoryBackend<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    /// Creates an empty backend with no batch size ceiling.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates an empty backend that rejects batches larger than `limit`
    /// operations, simulating a transactional payload ceiling.
    pub fn with_batch_limit(limit: usize) -> Self {
        Self::build(Some(limit))
    }

    fn build(batch_limit: Option<usize>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);
        Self {
            rows: RwLock::new(HashMap::new()),
            changes,
            batch_limit,
            fail_next: AtomicBool::new(false),
            fail_query: AtomicBool::new(false),
            inserts: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Seeds raw rows at `key`, bypassing the write pipeline.
    ///
    /// Passing more than one row reproduces the multiple-results anomaly the
    /// read path must tolerate.
    pub fn seed_rows(&self, key: K, rows: Vec<V>) {
        self.rows.write().expect("lock poisoned").insert(key, rows);
    }

    /// The first row stored at `key`, if any.
    pub fn value(&self, key: &K) -> Option<V> {
        self.rows
            .read()
            .expect("lock poisoned")
            .get(key)
            .and_then(|rows| rows.first())
            .cloned()
    }

    /// Number of keys with at least one row.
    pub fn key_count(&self) -> usize {
        self.rows.read().expect("lock poisoned").len()
    }

    /// Makes the next `apply_batch` call fail with a backend error.
    ///
    /// The failure consumes the flag; subsequent applies succeed again.
    pub fn fail_next_apply(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Makes the next `query` call fail with a backend error.
    ///
    /// The failure consumes the flag; subsequent queries succeed again.
    pub fn fail_next_query(&self) {
        self.fail_query.store(true, Ordering::SeqCst);
    }

    /// Number of insert operations applied so far.
    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Number of update operations applied so far.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Number of batches applied successfully.
    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Number of `apply_batch` calls attempted, failed ones included.
    pub fn apply_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<K, V> Default for MemoryBackend<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> StoreBackend for MemoryBackend<K, V>
where
    K: Clone + Eq + Ord + Hash + std::fmt::Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    type Key = K;
    type Value = V;
    type Selector = MemorySelector<K>;

    async fn query(&self, key: &K) -> Result<Vec<V>> {
        if self.fail_query.swap(false, Ordering::SeqCst) {
            return Err(Error::Backend("injected query failure".to_string()));
        }
        let rows = self.rows.read().expect("lock poisoned");
        Ok(rows.get(key).cloned().unwrap_or_default())
    }

    async fn query_all(&self, selector: &MemorySelector<K>) -> Result<Vec<V>> {
        let rows = self.rows.read().expect("lock poisoned");
        match selector {
            MemorySelector::Key(key) => Ok(rows.get(key).cloned().unwrap_or_default()),
            MemorySelector::All => {
                let mut keys: Vec<&K> = rows.keys().collect();
                keys.sort();
                Ok(keys
                    .into_iter()
                    .flat_map(|k| rows[k].iter().cloned())
                    .collect())
            }
        }
    }

    async fn apply_batch(&self, batch: Batch<K, V>) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Backend("injected apply failure".to_string()));
        }

        if let Some(limit) = self.batch_limit {
            if batch.len() > limit {
                return Err(Error::BatchTooLarge {
                    size: batch.len(),
                    limit,
                });
            }
        }

        let mut applied_keys = Vec::with_capacity(batch.len());
        {
            // One write guard for the whole batch keeps the apply atomic
            // from any reader's point of view.
            let mut rows = self.rows.write().expect("lock poisoned");
            for op in batch.into_ops() {
                match op {
                    WriteOp::Insert { key, value } => {
                        self.inserts.fetch_add(1, Ordering::SeqCst);
                        rows.insert(key.clone(), vec![value]);
                        applied_keys.push(key);
                    }
                    WriteOp::Update { key, value } => {
                        self.updates.fetch_add(1, Ordering::SeqCst);
                        rows.insert(key.clone(), vec![value]);
                        applied_keys.push(key);
                    }
                }
            }
        }

        self.batches.fetch_add(1, Ordering::SeqCst);

        for key in applied_keys {
            // No subscribers is fine; notification delivery is best effort.
            let _ = self.changes.send(key);
        }

        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<K> {
        self.changes.subscribe()
    }
}

impl<K, V> std::fmt::Debug for MemoryBackend<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("batch_limit", &self.batch_limit)
            .field("batches", &self.batches.load(Ordering::SeqCst))
            .finish()
    }
}
