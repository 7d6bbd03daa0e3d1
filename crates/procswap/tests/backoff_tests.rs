//! Read retry behavior through the engine.
//!
//! Reloads read through an in-memory filesystem that fails on demand. Tokio's
//! clock is paused, so the backoff elapses instantly and is measured exactly.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use procswap::{BoxFuture, DataCompiler, Hotswap, HotswapError, HotswapEvent, SourceFs};
use serde_json::json;
use tokio::time::Instant;

/// Files with a logical clock: every `put` stamps the file one second later
/// than the previous one.
#[derive(Clone, Default)]
struct MemoryFs {
    files: Arc<Mutex<HashMap<PathBuf, (String, SystemTime)>>>,
    clock: Arc<AtomicU64>,
    failures: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl MemoryFs {
    fn put(&self, path: &Path, content: &str) {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(tick);
        self.files
            .lock()
            .insert(path.to_path_buf(), (content.to_string(), stamp));
    }

    fn fail_next(&self, reads: usize) {
        self.failures.store(reads, Ordering::SeqCst);
    }
}

impl SourceFs for MemoryFs {
    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<String>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
            }
            self.files
                .lock()
                .get(path)
                .map(|(content, _)| content.clone())
                .ok_or_else(|| io::ErrorKind::NotFound.into())
        })
    }

    fn modified<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<SystemTime>> {
        Box::pin(async move {
            self.files
                .lock()
                .get(path)
                .map(|(_, stamp)| *stamp)
                .ok_or_else(|| io::ErrorKind::NotFound.into())
        })
    }

    fn modified_sync(&self, path: &Path) -> Option<SystemTime> {
        self.files.lock().get(path).map(|(_, stamp)| *stamp)
    }
}

fn engine(fs: &MemoryFs) -> Hotswap {
    Hotswap::builder()
        .compiler(DataCompiler::new())
        .source_fs(fs.clone())
        .watch(false)
        .build()
        .unwrap()
}

const UNIT: &str = "/virtual/units/flaky.hot";

#[tokio::test(start_paused = true)]
async fn test_two_failures_then_success() {
    let fs = MemoryFs::default();
    let path = Path::new(UNIT);
    fs.put(path, r#"{"value": 1}"#);

    let hotswap = engine(&fs);
    assert!(hotswap.reload_file(path).await);
    let held = hotswap.surface(path).unwrap();

    fs.put(path, r#"{"value": 2}"#);
    fs.fail_next(2);
    fs.reads.store(0, Ordering::SeqCst);

    let start = Instant::now();
    assert!(hotswap.reload_file(path).await);
    let elapsed = start.elapsed();

    assert_eq!(fs.reads.load(Ordering::SeqCst), 3);
    assert!(elapsed >= Duration::from_millis(400), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(405), "{elapsed:?}");
    assert_eq!(held.get("value"), Some(json!(2)));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_report_one_error() {
    let fs = MemoryFs::default();
    let path = Path::new(UNIT);
    fs.put(path, r#"{"value": 1}"#);

    let hotswap = engine(&fs);
    assert!(hotswap.reload_file(path).await);
    let held = hotswap.surface(path).unwrap();
    let events = hotswap.subscribe();

    fs.put(path, r#"{"value": 2}"#);
    fs.fail_next(usize::MAX);

    let start = Instant::now();
    assert!(!hotswap.reload_file(path).await);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1400), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1405), "{elapsed:?}");

    let errors: Vec<HotswapError> = events
        .try_iter()
        .filter_map(|event| match event {
            HotswapEvent::Error(err) => Some(err),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], HotswapError::Io { attempts: 4, .. }));
    assert_eq!(held.get("value"), Some(json!(1)));
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_skips_unreadable_units() {
    let fs = MemoryFs::default();
    let good = Path::new("/virtual/units/good.hot");
    let bad = Path::new("/virtual/units/bad.hot");
    fs.put(good, r#"{"value": 1}"#);

    let hotswap = engine(&fs);
    assert!(hotswap.reload_file(good).await);
    // `bad` has never been readable, so it cannot be tracked.
    assert!(!hotswap.reload_file(bad).await);
    assert_eq!(hotswap.tracked(), vec![good.to_path_buf()]);

    fs.put(good, r#"{"value": 2}"#);
    let reloaded = hotswap.reconcile_now().await;

    assert_eq!(reloaded, vec![good.to_path_buf()]);
    assert_eq!(hotswap.surface(good).unwrap().get("value"), Some(json!(2)));

    // The applied time came from the same filesystem, so nothing is newer.
    assert!(hotswap.reconcile_now().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reload_records_filesystem_time() {
    let fs = MemoryFs::default();
    let path = Path::new(UNIT);
    fs.put(path, r#"{"value": 1}"#);

    let hotswap = engine(&fs);
    assert!(hotswap.reload_file(path).await);
    assert_eq!(
        hotswap.unit(path).unwrap().applied_mtime(),
        Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1))
    );

    fs.reads.store(0, Ordering::SeqCst);
    assert!(hotswap.reconcile_now().await.is_empty());
    assert_eq!(fs.reads.load(Ordering::SeqCst), 0);
}
