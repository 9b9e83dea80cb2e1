//! # Writeback - Write-Coalescing Store Core
//!
//! Writeback sits in front of a transactional backend whose write
//! transactions are expensive (IPC-style atomic applies with a payload
//! ceiling) and protects it from floods of small writes. It accepts a stream
//! of keyed upserts, serializes concurrent writes per key, skips writes that
//! would change nothing, and groups the rest into atomic batches:
//!
//! - **Per-key mutual exclusion**: no two writes to the same logical record
//!   race destructively
//! - **Operation derivation**: insert / update / no-op, decided against the
//!   backend's current state with a pluggable merge
//! - **Dual-trigger batching**: a debounce window with a hard size cap
//! - **Atomic application**: one backend transaction per batch, locks
//!   released on success
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       StoreCore (facade)                        │
//! │                put / get_once / get_all_once                    │
//! └───────┬─────────────────────────────────────────────┬───────────┘
//!         │ intake (unbounded)                          │ reads
//!         ▼                                             │
//! ┌───────────────────┐   per-key FIFO tickets          │
//! │    Dispatcher     │◀───────── KeyLocker             │
//! │  + build tasks    │                                 │
//! └───────┬───────────┘                                 │
//!         │ insert/update ops (no-ops filtered out)     │
//!         ▼                                             │
//! ┌───────────────────┐    ┌───────────────────┐        │
//! │      Batcher      │───▶│      Applier      │        │
//! │ debounce + cap    │    │ apply + release   │        │
//! └───────────────────┘    └─────────┬─────────┘        │
//!                                    ▼                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Backend (external collaborator)               │
//! │              keyed query · atomic apply-batch                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. At most one pending operation per key is in flight (locked) at any
//!    instant; a second `put` for the same key waits for the release.
//! 2. A key's lock, once granted, is released exactly once: immediately for
//!    a no-op, otherwise after its batch has been applied.
//! 3. A batch's operation order is arrival order into the window; no-ops
//!    never enter a batch.
//! 4. Writes for different keys carry no ordering guarantee, relative to
//!    each other or to reads.
//!
//! ## Example
//!
//! ```rust,ignore
//! use writeback::{MemoryBackend, StoreCore};
//!
//! #[tokio::main]
//! async fn main() -> writeback::Result<()> {
//!     let store = StoreCore::new(MemoryBackend::<String, String>::new());
//!
//!     // Fire-and-forget: coalesced, merged, batched behind the scenes.
//!     store.put("user-1".into(), "alice".into())?;
//!     store.put("user-1".into(), "alice v2".into())?;
//!
//!     store.shutdown().await; // drain the pipeline
//!     assert_eq!(store.get_once(&"user-1".into()).await?.as_deref(), Some("alice v2"));
//!     Ok(())
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for store core operations.
pub mod error;

/// The backend contract: keyed query, atomic batch apply, change
/// notification registration.
pub mod backend;

/// Per-key exclusive sections with FIFO handoff.
pub mod lock;

/// In-memory backend for tests and embedding.
pub mod memory;

/// The store core facade and its configuration.
pub mod store;

/// Operation, batch, and merge-strategy types.
pub mod types;

// Pipeline stages; internal except for the applier's failure policy.
mod applier;
mod batcher;
mod builder;

// =============================================================================
// Re-exports
// =============================================================================

pub use applier::ApplyFailurePolicy;
pub use backend::StoreBackend;
pub use error::{Error, Result};
pub use lock::KeyLocker;
pub use memory::{MemoryBackend, MemorySelector};
pub use store::{StoreConfig, StoreCore, DEFAULT_GROUPING_TIMEOUT_MS, DEFAULT_GROUP_MAX_SIZE};
pub use types::{Batch, MergeFn, PendingOp, WriteOp};
