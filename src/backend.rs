//! # Backend Contract
//!
//! [`StoreBackend`] is the seam between the coalescing core and the external
//! transactional store it protects. The core consumes the backend through
//! exactly three operations (keyed query, selector query, and atomic batch
//! apply) plus a change-notification registration it passes through to the
//! surrounding store.
//!
//! Row decoding and encoding are the backend collaborator's responsibility:
//! the trait trades in already-decoded values, never raw rows.
//!
//! All implementations must satisfy these invariants:
//! - `query`/`query_all` have no side effects and are safe to call
//!   concurrently with anything, including an in-flight `apply_batch`.
//! - `apply_batch` is atomic: either every operation in the batch takes
//!   effect or none does. A batch whose encoded payload exceeds the
//!   backend's transactional size ceiling must be rejected whole, never
//!   applied partially.
//! - One `apply_batch` call is in flight at a time from a single store core;
//!   the backend need not serialize applies across core instances.

use std::fmt;
use std::hash::Hash;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::Batch;

/// Abstract transactional store interface consumed by the coalescing core.
///
/// Implementations must be thread-safe (`Send + Sync`) and support async
/// operations.
#[async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    /// Opaque, hashable, comparable identifier of a logical record.
    type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// The domain record type; must support equality comparison so the core
    /// can detect writes that change nothing.
    type Value: Clone + PartialEq + Send + Sync + 'static;

    /// Opaque selector for multi-record queries, owned by the backend
    /// (a collection locator, a filter, a scan range).
    type Selector: Send + Sync;

    /// Reads the decoded rows currently stored at `key`.
    ///
    /// Zero rows means the record is absent. More than one row is an
    /// anomaly the core tolerates on its read path but never produces.
    async fn query(&self, key: &Self::Key) -> Result<Vec<Self::Value>>;

    /// Reads all decoded rows matching `selector`, preserving the backend's
    /// result order.
    async fn query_all(&self, selector: &Self::Selector) -> Result<Vec<Self::Value>>;

    /// Applies every operation in `batch` as a single atomic transaction.
    ///
    /// # Errors
    ///
    /// Must fail the whole batch, with nothing applied, on any error,
    /// including an oversized payload ([`Error::BatchTooLarge`]).
    ///
    /// [`Error::BatchTooLarge`]: crate::error::Error::BatchTooLarge
    async fn apply_batch(&self, batch: Batch<Self::Key, Self::Value>) -> Result<()>;

    /// Registers for "data changed at this key" notifications.
    ///
    /// The core only exposes the registration; reacting to notifications
    /// belongs to the surrounding store. Backends should publish a key after
    /// each successfully applied operation for it, external writers
    /// included.
    fn changes(&self) -> broadcast::Receiver<Self::Key>;
}
