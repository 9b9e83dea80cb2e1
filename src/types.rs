//! # Domain Types for the Write Pipeline
//!
//! This module defines the operation and batch types that flow between the
//! pipeline stages, plus the pluggable merge strategy.
//!
//! The central distinction is [`PendingOp`] versus [`WriteOp`]: an operation
//! build can resolve to "nothing to write" ([`PendingOp::NoOp`]), but a no-op
//! must never reach a batch: it releases its key lock immediately instead of
//! handing it to the batch. [`WriteOp`] is the no-op-free subset, so the type
//! system enforces that filter: a [`Batch`] can only ever contain inserts and
//! updates.
//!
//! ## Invariants
//!
//! - At most one pending operation per key is in flight (locked) at a time.
//! - A batch's operations are ordered by arrival into the window, and every
//!   key in a batch holds its lock until the batch is applied.

use std::sync::Arc;

// =============================================================================
// Pending Operations
// =============================================================================

/// The outcome of deriving a write against current backend state.
///
/// Produced exactly once per `put` request, after the key's lock is held and
/// the backend has been queried:
///
/// - no current row → [`Insert`](PendingOp::Insert)
/// - merged value differs from current → [`Update`](PendingOp::Update)
/// - merged value equals current → [`NoOp`](PendingOp::NoOp), lock released
///   early
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOp<K, V> {
    /// Create the record; no row exists for the key.
    Insert { key: K, value: V },
    /// Replace the record with the merged value.
    Update { key: K, value: V },
    /// The merged value equals the current one; nothing to write.
    NoOp { key: K },
}

impl<K, V> PendingOp<K, V> {
    /// The key this operation targets.
    pub fn key(&self) -> &K {
        match self {
            PendingOp::Insert { key, .. } => key,
            PendingOp::Update { key, .. } => key,
            PendingOp::NoOp { key } => key,
        }
    }

    /// Returns `true` for the no-op variant.
    pub fn is_no_op(&self) -> bool {
        matches!(self, PendingOp::NoOp { .. })
    }

    /// Filters the operation into the batchable subset.
    ///
    /// `NoOp` yields `None`; the caller is responsible for having released
    /// the key's lock before discarding it.
    pub fn into_write_op(self) -> Option<WriteOp<K, V>> {
        match self {
            PendingOp::Insert { key, value } => Some(WriteOp::Insert { key, value }),
            PendingOp::Update { key, value } => Some(WriteOp::Update { key, value }),
            PendingOp::NoOp { .. } => None,
        }
    }
}

// =============================================================================
// Write Operations and Batches
// =============================================================================

/// A write operation that participates in a batch: insert or update only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp<K, V> {
    /// Create the record at `key`.
    Insert { key: K, value: V },
    /// Replace the record at `key` with `value`.
    Update { key: K, value: V },
}

impl<K, V> WriteOp<K, V> {
    /// The key this operation targets.
    pub fn key(&self) -> &K {
        match self {
            WriteOp::Insert { key, .. } => key,
            WriteOp::Update { key, .. } => key,
        }
    }

    /// The value this operation carries.
    pub fn value(&self) -> &V {
        match self {
            WriteOp::Insert { value, .. } => value,
            WriteOp::Update { value, .. } => value,
        }
    }
}

/// An ordered group of write operations applied atomically in one backend
/// transaction.
///
/// Created by the batcher when a window closes, consumed by the applier.
/// Operation order matches arrival order into the window. Keys within a batch
/// are distinct: a key's lock is held until its batch applies, so a second
/// operation for the same key cannot be built before the first one's batch
/// resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<K, V> {
    ops: Vec<WriteOp<K, V>>,
}

impl<K, V> Batch<K, V> {
    /// Seals a window's operations into a batch.
    pub fn new(ops: Vec<WriteOp<K, V>>) -> Self {
        Self { ops }
    }

    /// Number of operations in the batch.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns `true` if the batch has no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Iterates the operations in arrival order.
    pub fn ops(&self) -> &[WriteOp<K, V>] {
        &self.ops
    }

    /// Iterates the keys represented in the batch, in arrival order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.ops.iter().map(WriteOp::key)
    }

    /// Consumes the batch, yielding its operations.
    pub fn into_ops(self) -> Vec<WriteOp<K, V>> {
        self.ops
    }
}

// =============================================================================
// Merge Strategy
// =============================================================================

/// Pluggable two-argument merge strategy: `(current, incoming) -> merged`.
///
/// The default policy is "new value wins". A store may override it at
/// construction, e.g. with a field-level union for partial records. Invoked
/// only when the incoming value differs from the current one; if the merged
/// result still equals the current value the operation resolves to a no-op.
pub type MergeFn<V> = Arc<dyn Fn(&V, &V) -> V + Send + Sync>;
