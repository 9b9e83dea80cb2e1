//! Per-Key Serialization Tests
//!
//! Tests the central locking invariant through an instrumented backend: at
//! most one operation build per key is in flight at any instant, across any
//! interleaving of concurrent puts, while different keys build concurrently.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use writeback::{
    Batch, MemoryBackend, MemorySelector, Result, StoreBackend, StoreCore,
};

/// Delegates to a [`MemoryBackend`] while tracking how many keyed queries
/// overlap in time. Every operation build performs exactly one keyed query
/// under the key's lock, so the high-water mark observed here is the number
/// of concurrently in-flight builds.
struct ProbeBackend {
    inner: MemoryBackend<String, String>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ProbeBackend {
    fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreBackend for ProbeBackend {
    type Key = String;
    type Value = String;
    type Selector = MemorySelector<String>;

    async fn query(&self, key: &String) -> Result<Vec<String>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        // Hold the query open long enough for racing builds to overlap.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let rows = self.inner.query(key).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        rows
    }

    async fn query_all(&self, selector: &MemorySelector<String>) -> Result<Vec<String>> {
        self.inner.query_all(selector).await
    }

    async fn apply_batch(&self, batch: Batch<String, String>) -> Result<()> {
        self.inner.apply_batch(batch).await
    }

    fn changes(&self) -> tokio::sync::broadcast::Receiver<String> {
        self.inner.changes()
    }
}

/// Ten racing puts for one key: their builds must run strictly one at a
/// time, and the fold must end on the last submitted value.
#[tokio::test]
async fn same_key_builds_never_overlap() {
    common::init_tracing();
    let store = StoreCore::with_config(ProbeBackend::new(), common::fast_config());

    for i in 0..10 {
        store.put("hot".to_string(), format!("v{i}")).unwrap();
    }

    common::eventually(Duration::from_secs(5), Duration::from_millis(10), || {
        (store.backend().inner.value(&"hot".to_string()) == Some("v9".to_string())).then_some(())
    })
    .await;

    assert_eq!(
        store.backend().max_in_flight(),
        1,
        "concurrent builds observed for a single key"
    );
}

/// Builds for distinct keys are not serialized against each other.
#[tokio::test]
async fn distinct_keys_build_concurrently() {
    common::init_tracing();
    let store = StoreCore::with_config(ProbeBackend::new(), common::fast_config());

    for i in 0..8 {
        store.put(format!("key-{i}"), "v".to_string()).unwrap();
    }

    common::eventually(Duration::from_secs(5), Duration::from_millis(10), || {
        (store.backend().inner.key_count() == 8).then_some(())
    })
    .await;

    assert!(
        store.backend().max_in_flight() >= 2,
        "distinct keys should have built concurrently, max was {}",
        store.backend().max_in_flight()
    );
}

/// A key's lock travels with its batch: the second put for the key cannot
/// build until the first batch has been applied, so back-to-back puts land
/// in separate batches.
#[tokio::test]
async fn second_put_waits_for_first_batch() {
    common::init_tracing();
    let store = StoreCore::with_config(ProbeBackend::new(), common::fast_config());

    store.put("k".to_string(), "first".to_string()).unwrap();
    store.put("k".to_string(), "second".to_string()).unwrap();

    common::eventually(Duration::from_secs(5), Duration::from_millis(10), || {
        (store.backend().inner.value(&"k".to_string()) == Some("second".to_string())).then_some(())
    })
    .await;

    let backend = &store.backend().inner;
    assert_eq!(backend.insert_count(), 1);
    assert_eq!(backend.update_count(), 1);
    assert_eq!(backend.batch_count(), 2);
}
