#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use writeback::{MemoryBackend, StoreConfig, StoreCore};

pub type TestBackend = MemoryBackend<String, String>;
pub type TestStore = StoreCore<TestBackend>;

/// Installs a test-writer tracing subscriber once per process so pipeline
/// warnings show up in failing test output.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// A config with a short debounce so tests drain quickly.
pub fn fast_config() -> StoreConfig {
    StoreConfig {
        grouping_timeout: Duration::from_millis(20),
        ..StoreConfig::default()
    }
}

pub fn store_with(config: StoreConfig) -> TestStore {
    init_tracing();
    StoreCore::with_config(MemoryBackend::new(), config)
}

pub async fn eventually<T>(
    timeout: Duration,
    interval: Duration,
    mut f: impl FnMut() -> Option<T>,
) -> T {
    let start = std::time::Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(interval).await;
    }
}

/// Polls the backend directly until `key` holds `want`.
pub async fn drained(store: &TestStore, key: &str, want: &str) {
    let key = key.to_string();
    let want = want.to_string();
    eventually(Duration::from_secs(3), Duration::from_millis(5), || {
        (store.backend().value(&key).as_ref() == Some(&want)).then_some(())
    })
    .await;
}
