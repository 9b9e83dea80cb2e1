//! # Batch Windowing
//!
//! Second stage of the write pipeline: groups the ordered stream of write
//! operations into batches with a dual trigger, whichever fires first:
//!
//! - **Debounce**: a quiet period of `grouping_timeout` elapses with no new
//!   operation since the last one in the window. The timer restarts on every
//!   arrival.
//! - **Size cap**: the window reaches `group_max_size` operations.
//!
//! ```text
//! ops ──▶ │ op op op ····(quiet)···· │ op op op op op op op op │ op ····
//!         └── batch: debounce fired ─┘└─ batch: size cap hit  ─┘
//! ```
//!
//! Debounce keeps the batch count low under bursty writers; the size cap
//! bounds the encoded payload below the backend's transactional ceiling. A
//! new window opens the moment the previous one seals, including for
//! operations that arrive while a sealed batch is still being applied
//! downstream. When the op stream closes, the final partial window is
//! flushed before the stage exits.

use std::mem;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

use crate::types::{Batch, WriteOp};

/// Collects write operations into batches and emits them in window-close
/// order. Runs until the op channel closes and the last window is flushed,
/// or until the batch channel is dropped by the applier.
pub(crate) async fn run_batcher<K, V>(
    mut ops_rx: mpsc::Receiver<WriteOp<K, V>>,
    batch_tx: mpsc::Sender<Batch<K, V>>,
    grouping_timeout: Duration,
    group_max_size: usize,
) where
    K: Send + 'static,
    V: Send + 'static,
{
    let group_max_size = group_max_size.max(1);
    let mut window: Vec<WriteOp<K, V>> = Vec::new();

    loop {
        let next = if window.is_empty() {
            // Nothing buffered: wait for the window-opening operation
            // without any timer running.
            match ops_rx.recv().await {
                Some(op) => Some(op),
                None => break,
            }
        } else {
            match timeout(grouping_timeout, ops_rx.recv()).await {
                Ok(Some(op)) => Some(op),
                Ok(None) => break,
                // Quiet period elapsed with no arrival.
                Err(_) => None,
            }
        };

        match next {
            Some(op) => {
                window.push(op);
                if window.len() >= group_max_size && seal(&mut window, &batch_tx).await.is_err() {
                    return;
                }
            }
            None => {
                if seal(&mut window, &batch_tx).await.is_err() {
                    return;
                }
            }
        }
    }

    // Stream ended: flush whatever the last window accumulated.
    if !window.is_empty() {
        let _ = seal(&mut window, &batch_tx).await;
    }
}

/// Seals the current window into a batch and emits it, leaving the window
/// empty for subsequent operations.
async fn seal<K, V>(
    window: &mut Vec<WriteOp<K, V>>,
    batch_tx: &mpsc::Sender<Batch<K, V>>,
) -> Result<(), ()> {
    let batch = Batch::new(mem::take(window));
    debug!(ops = batch.len(), "sealed batch");
    batch_tx.send(batch).await.map_err(|_| ())
}
