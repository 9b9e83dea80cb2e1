//! Batch Window Trigger Tests
//!
//! Tests the dual trigger end to end through the store facade:
//! - `group_max_size` operations with no gaps emit exactly one full batch
//! - A lone operation followed by silence emits one batch after the quiet
//!   period
//! - A long stream splits at the cap and flushes its tail on the debounce
//! - A no-op never opens a window at all

mod common;

use std::time::{Duration, Instant};

use writeback::StoreConfig;

#[tokio::test]
async fn size_cap_emits_one_full_batch() {
    // Debounce far away so only the size trigger can seal the window.
    let store = common::store_with(StoreConfig {
        grouping_timeout: Duration::from_secs(60),
        group_max_size: 5,
        ..StoreConfig::default()
    });

    for i in 0..5 {
        store.put(format!("key-{i}"), "v".to_string()).unwrap();
    }

    common::eventually(Duration::from_secs(3), Duration::from_millis(5), || {
        (store.backend().batch_count() == 1).then_some(())
    })
    .await;
    assert_eq!(store.backend().insert_count(), 5);
}

#[tokio::test]
async fn lone_write_is_sealed_by_the_quiet_period() {
    let quiet = Duration::from_millis(50);
    let store = common::store_with(StoreConfig {
        grouping_timeout: quiet,
        group_max_size: 100,
        ..StoreConfig::default()
    });

    let started = Instant::now();
    store.put("solo".to_string(), "v".to_string()).unwrap();

    common::eventually(Duration::from_secs(3), Duration::from_millis(5), || {
        (store.backend().batch_count() == 1).then_some(())
    })
    .await;

    // The window cannot have closed before the quiet period elapsed.
    assert!(started.elapsed() >= quiet);
    assert_eq!(store.backend().insert_count(), 1);
}

#[tokio::test]
async fn stream_splits_at_cap_then_flushes_tail() {
    let store = common::store_with(StoreConfig {
        grouping_timeout: Duration::from_millis(200),
        group_max_size: 3,
        ..StoreConfig::default()
    });

    // Seven gapless operations: two full windows of three, then a tail of
    // one sealed by the debounce.
    for i in 0..7 {
        store.put(format!("key-{i}"), "v".to_string()).unwrap();
    }

    common::eventually(Duration::from_secs(3), Duration::from_millis(10), || {
        (store.backend().batch_count() == 3).then_some(())
    })
    .await;
    assert_eq!(store.backend().insert_count(), 7);
}

/// A put whose merged value equals the current one releases its lock early
/// and never reaches the batcher: no window, no apply call.
#[tokio::test]
async fn no_op_never_reaches_a_batch() {
    let store = common::store_with(common::fast_config());
    store
        .backend()
        .seed_rows("k".to_string(), vec!["v".to_string()]);

    store.put("k".to_string(), "v".to_string()).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(store.backend().apply_attempts(), 0);
    assert_eq!(store.backend().batch_count(), 0);
}
