//! # Per-Key Exclusive Sections
//!
//! [`KeyLocker`] serializes all pipeline work for one key while leaving
//! different keys fully concurrent. It is the only piece of shared mutable
//! state in the core besides the backend itself.
//!
//! ## Why a Ticket Split?
//!
//! Acquisition is split into two steps: a synchronous [`enqueue`] that
//! registers the caller's FIFO position, and an asynchronous wait on the
//! returned [`Ticket`]. The intake dispatcher enqueues tickets in request
//! arrival order before spawning the build tasks, which is what makes two
//! `put` calls for the same key resolve in submission order even though the
//! builds themselves run on concurrent tasks. A plain async acquire racing
//! across spawned tasks could not give that guarantee.
//!
//! ## Lock Lifecycle
//!
//! ```text
//! enqueue(k)            granted                  release(k)
//!    │                     │                        │
//!    ▼                     ▼                        ▼
//!  free ──────────────▶ held by A ──────────────▶ handoff to next
//!                          │                      waiter, or free
//!       enqueue(k) again   │
//!              └──▶ queued behind A (FIFO)
//! ```
//!
//! A key's lock is released exactly once per grant: immediately when the
//! derived operation is a no-op, otherwise after the batch containing the
//! operation has been applied. There is no re-entrancy: one logical caller
//! acquiring the same key twice without releasing deadlocks itself, which
//! signals a correctness bug upstream.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::warn;

/// A granted-or-pending registration for one key's exclusive section.
///
/// Await [`granted`](Ticket::granted) before touching the key's record. If
/// the lock was free at enqueue time the ticket is already granted and the
/// await returns immediately.
#[derive(Debug)]
pub struct Ticket {
    grant: oneshot::Receiver<()>,
}

impl Ticket {
    /// Suspends the caller until the registration is granted.
    ///
    /// Returns immediately for an already-granted ticket. If the locker was
    /// torn down before the grant arrived (pipeline shutdown), this returns
    /// as well; the caller's send into the next stage will fail and clean up.
    pub async fn granted(self) {
        let _ = self.grant.await;
    }
}

/// Mapping from key to a held/free exclusive-section state plus a FIFO wait
/// queue. One instance per store core.
///
/// An entry in the table means the key is held; the deque holds the waiters
/// in arrival order. Table access is guarded by a plain mutex; no await
/// point ever runs under the guard.
pub struct KeyLocker<K> {
    table: Mutex<HashMap<K, VecDeque<oneshot::Sender<()>>>>,
}

impl<K> KeyLocker<K>
where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Registers the caller for `key`'s exclusive section.
    ///
    /// If the key is free, the caller becomes the holder and the returned
    /// ticket is granted immediately. Otherwise the caller joins the key's
    /// FIFO queue. Registration itself never blocks; the wait happens on the
    /// ticket.
    pub fn enqueue(&self, key: K) -> Ticket {
        let (grant_tx, grant_rx) = oneshot::channel();
        let mut table = self.table.lock().expect("lock table poisoned");

        match table.get_mut(&key) {
            None => {
                // Free: register as holder and grant on the spot.
                table.insert(key, VecDeque::new());
                let _ = grant_tx.send(());
            }
            Some(waiters) => {
                waiters.push_back(grant_tx);
            }
        }

        Ticket { grant: grant_rx }
    }

    /// Blocks the calling task until no other holder is registered for
    /// `key`, then registers the caller as holder.
    pub async fn acquire(&self, key: K) {
        self.enqueue(key).granted().await;
    }

    /// Removes the current holder registration for `key` and wakes the next
    /// waiter, if any.
    ///
    /// The lock is handed off directly: the woken waiter becomes the holder
    /// without the key ever appearing free, so late arrivals cannot jump the
    /// queue. Releasing a key with no holder is not fatal; it logs a warning
    /// and does nothing.
    pub fn release(&self, key: &K) {
        let mut table = self.table.lock().expect("lock table poisoned");

        let Some(waiters) = table.get_mut(key) else {
            warn!(key = ?key, "release without matching acquire");
            return;
        };

        // Hand off to the first waiter still listening. A waiter whose
        // ticket was dropped is skipped.
        while let Some(next) = waiters.pop_front() {
            if next.send(()).is_ok() {
                return;
            }
        }

        table.remove(key);
    }

    /// Returns `true` if `key` currently has a holder.
    pub fn is_held(&self, key: &K) -> bool {
        self.table
            .lock()
            .expect("lock table poisoned")
            .contains_key(key)
    }
}

impl<K> Default for KeyLocker<K>
where
    K: Clone + Eq + Hash + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> std::fmt::Debug for KeyLocker<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let held = self.table.lock().expect("lock table poisoned").len();
        f.debug_struct("KeyLocker").field("held_keys", &held).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_free_key_grants_immediately() {
        let locker = KeyLocker::new();
        locker.acquire("a").await;
        assert!(locker.is_held(&"a"));

        locker.release(&"a");
        assert!(!locker.is_held(&"a"));
    }

    #[tokio::test]
    async fn test_second_acquire_waits_for_release() {
        let locker = Arc::new(KeyLocker::new());
        locker.acquire("a").await;

        let waiter = {
            let locker = Arc::clone(&locker);
            tokio::spawn(async move {
                locker.acquire("a").await;
            })
        };

        // The waiter must still be parked while we hold the key.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        locker.release(&"a");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be granted after release")
            .unwrap();

        // Handed off, not freed: the waiter is the holder now.
        assert!(locker.is_held(&"a"));
    }

    #[tokio::test]
    async fn test_waiters_are_granted_in_fifo_order() {
        let locker = Arc::new(KeyLocker::new());
        locker.acquire("k").await;

        // Enqueue three waiters in a known order.
        let tickets: Vec<_> = (0..3).map(|_| locker.enqueue("k")).collect();

        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();
        for (i, ticket) in tickets.into_iter().enumerate() {
            let order_tx = order_tx.clone();
            tokio::spawn(async move {
                ticket.granted().await;
                let _ = order_tx.send(i);
            });
        }

        // Each release grants exactly the next waiter in line.
        for expected in 0..3 {
            locker.release(&"k");
            let got = tokio::time::timeout(Duration::from_secs(1), order_rx.recv())
                .await
                .expect("grant should arrive")
                .unwrap();
            assert_eq!(got, expected);
        }

        locker.release(&"k");
        assert!(!locker.is_held(&"k"));
    }

    #[tokio::test]
    async fn test_release_without_holder_is_harmless() {
        let locker: KeyLocker<&str> = KeyLocker::new();
        // Logged as a warning, otherwise a no-op.
        locker.release(&"never-acquired");
        assert!(!locker.is_held(&"never-acquired"));
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_skipped_on_handoff() {
        let locker = KeyLocker::new();
        locker.acquire("k").await;

        // This waiter gives up before being granted.
        let abandoned = locker.enqueue("k");
        drop(abandoned);

        let survivor = locker.enqueue("k");
        locker.release(&"k");

        tokio::time::timeout(Duration::from_secs(1), survivor.granted())
            .await
            .expect("surviving waiter should be granted");
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let locker = KeyLocker::new();
        locker.acquire("a").await;
        // A different key is granted immediately despite "a" being held.
        tokio::time::timeout(Duration::from_millis(100), locker.acquire("b"))
            .await
            .expect("distinct key should not block");
        assert!(locker.is_held(&"a"));
        assert!(locker.is_held(&"b"));
    }
}
