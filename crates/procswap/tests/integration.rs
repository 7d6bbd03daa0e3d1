//! Integration tests for the reload engine.
//!
//! These drive the public `Hotswap` facade against real files in temporary
//! directories. Watching is turned off unless a test is about watching, so
//! reloads only happen when a test asks for them.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crossbeam_channel::Receiver;
use procswap::{
    CompileError, Compiler, ConfigUpdate, DataCompiler, Exports, Hotswap, HotswapError, HotswapEvent,
    LoadHandler, MigrationError, Module, ModuleLoader, Surface, SurfaceKind,
};
use serde_json::json;
use tempfile::{TempDir, tempdir};

// ============================================================================
// Helpers
// ============================================================================

fn engine() -> Hotswap {
    Hotswap::builder()
        .compiler(DataCompiler::new())
        .watch(false)
        .build()
        .unwrap()
}

fn write_unit(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Rewrites `path` and moves its modification time forward, so the change is
/// visible even on filesystems with coarse timestamps.
fn edit(path: &Path, content: &str, ahead: u64) {
    fs::write(path, content).unwrap();
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(ahead))
        .unwrap();
}

fn swaps(events: &Receiver<HotswapEvent>) -> Vec<PathBuf> {
    events
        .try_iter()
        .filter_map(|event| event.as_swap().cloned())
        .collect()
}

fn errors(events: &Receiver<HotswapEvent>) -> Vec<HotswapError> {
    events
        .try_iter()
        .filter_map(|event| event.as_error().cloned())
        .collect()
}

/// Compiles `fn` to a callable, `fail-migration` to an object whose
/// migration hook fails, and anything else as JSON data.
fn shape_compiler(path: &Path, source: &str) -> Result<Module, CompileError> {
    match source.trim() {
        "fn" => Ok(Module::new(Exports::callable(|_| json!("called"))).managed()),
        "fail-migration" => Ok(Module::new(Exports::object().with_value("value", 99))
            .with_migration(|_: &Module, _: &Module| Err(MigrationError::new("state lost")))),
        _ => DataCompiler::new().compile(path, source),
    }
}

// ============================================================================
// Identity Tests
// ============================================================================

#[tokio::test]
async fn test_reconcile_scenario_single_swap() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "x.hot", r#"{"value": 1}"#);

    let hotswap = engine();
    let events = hotswap.subscribe();

    let held = hotswap.require(&path).unwrap();
    assert_eq!(held.get("value"), Some(json!(1)));
    assert_eq!(hotswap.tracked(), vec![path.clone()]);

    edit(&path, r#"{"value": 2}"#, 10);

    let reloaded = hotswap.reconcile_now().await;
    assert_eq!(reloaded, vec![path.clone()]);
    assert_eq!(held.get("value"), Some(json!(2)));
    assert_eq!(swaps(&events), vec![path.clone()]);

    // Nothing changed since: nothing to reload.
    assert!(hotswap.reconcile_now().await.is_empty());
    assert!(swaps(&events).is_empty());
}

#[tokio::test]
async fn test_identity_survives_many_reloads() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "counter.hot", r#"{"n": 0, "old": true}"#);

    let hotswap = engine();
    let held = hotswap.require(&path).unwrap();
    let id = held.id();

    for n in 1..=5 {
        edit(&path, &format!(r#"{{"n": {n}}}"#), n * 10);
        assert_eq!(hotswap.reconcile_now().await.len(), 1);
        assert_eq!(held.get("n"), Some(json!(n)));
    }

    assert_eq!(held.id(), id);
    assert_eq!(held.epoch(), 5);
    // Members of earlier versions do not survive.
    assert!(!held.contains("old"));

    // Re-requiring returns the same stable surface.
    let again = hotswap.require(&path).unwrap();
    assert!(again.ptr_eq(&held));
    assert!(hotswap.surface(&path).unwrap().ptr_eq(&held));
}

#[tokio::test]
async fn test_reconcile_only_reloads_changed_units() {
    let dir = tempdir().unwrap();
    let a = write_unit(&dir, "a.hot", r#"{"v": "a1"}"#);
    let b = write_unit(&dir, "b.hot", r#"{"v": "b1"}"#);
    let c = write_unit(&dir, "c.hot", r#"{"v": "c1"}"#);

    let hotswap = engine();
    let held_a = hotswap.require(&a).unwrap();
    let held_b = hotswap.require(&b).unwrap();
    hotswap.require(&c).unwrap();

    edit(&a, r#"{"v": "a2"}"#, 10);
    edit(&b, r#"{"v": "b2"}"#, 10);

    let reloaded = hotswap.reconcile_now().await;
    assert_eq!(reloaded, vec![a, b]);
    assert_eq!(held_a.get("v"), Some(json!("a2")));
    assert_eq!(held_b.get("v"), Some(json!("b2")));
}

// ============================================================================
// Rejected Reload Tests
// ============================================================================

#[tokio::test]
async fn test_kind_change_is_rejected_once() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "shape.hot", r#"{"value": 1}"#);

    let hotswap = Hotswap::builder()
        .compiler(shape_compiler)
        .watch(false)
        .build()
        .unwrap();
    let events = hotswap.subscribe();
    let held = hotswap.require(&path).unwrap();

    edit(&path, "fn", 10);
    assert!(hotswap.reconcile_now().await.is_empty());

    let errors = errors(&events);
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        HotswapError::IncompatibleShape {
            expected: SurfaceKind::Object,
            found: SurfaceKind::Callable,
            ..
        }
    ));
    assert_eq!(held.kind(), SurfaceKind::Object);
    assert_eq!(held.get("value"), Some(json!(1)));
    assert_eq!(held.epoch(), 0);

    // The broken edit is not reported again until the file changes.
    assert!(hotswap.reconcile_now().await.is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_compile_error_keeps_previous_version() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "broken.hot", r#"{"value": 1}"#);

    let hotswap = engine();
    let events = hotswap.subscribe();
    let held = hotswap.require(&path).unwrap();

    edit(&path, r#"{"value": "#, 10);
    assert!(hotswap.reconcile_now().await.is_empty());

    let errors = errors(&events);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], HotswapError::Compile { .. }));
    assert_eq!(held.get("value"), Some(json!(1)));

    // The loader still hands out the existing surface.
    assert!(hotswap.require(&path).unwrap().ptr_eq(&held));

    edit(&path, r#"{"value": 3}"#, 20);
    assert_eq!(hotswap.reconcile_now().await, vec![path]);
    assert_eq!(held.get("value"), Some(json!(3)));
}

#[tokio::test]
async fn test_failed_migration_rolls_back() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "state.hot", r#"{"value": 1}"#);

    let hotswap = Hotswap::builder()
        .compiler(shape_compiler)
        .watch(false)
        .build()
        .unwrap();
    let events = hotswap.subscribe();
    let held = hotswap.require(&path).unwrap();

    edit(&path, "fail-migration", 10);
    assert!(hotswap.reconcile_now().await.is_empty());

    let errors = errors(&events);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], HotswapError::Migration { .. }));
    assert_eq!(held.get("value"), Some(json!(1)));
}

#[tokio::test]
async fn test_deleted_unit_keeps_previous_version() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "gone.hot", r#"{"value": 1}"#);

    let hotswap = engine();
    let held = hotswap.require(&path).unwrap();
    fs::remove_file(&path).unwrap();

    // The stat fails, so the unit is skipped rather than reloaded.
    assert!(hotswap.reconcile_now().await.is_empty());
    assert_eq!(held.get("value"), Some(json!(1)));
}

// ============================================================================
// Classification Tests
// ============================================================================

#[test]
fn test_unmanaged_units_are_not_tracked() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "plain.hot", r#"{"value": 1}"#);

    let hotswap = Hotswap::builder()
        .compiler(DataCompiler::new().managed(false))
        .watch(false)
        .build()
        .unwrap();

    let surface = hotswap.require(&path).unwrap();
    assert_eq!(surface.get("value"), Some(json!(1)));
    assert!(hotswap.tracked().is_empty());
    assert!(hotswap.surface(&path).is_none());
}

#[test]
fn test_unhooked_tags_load_plainly() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "data.json", r#"{"value": 1}"#);

    let hotswap = engine();
    let surface = hotswap.require(&path).unwrap();

    assert_eq!(surface.get("value"), Some(json!(1)));
    assert!(hotswap.tracked().is_empty());
}

#[test]
fn test_first_load_failure_is_reported_and_returned() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "bad.hot", "not json");

    let hotswap = engine();
    let events = hotswap.subscribe();

    let err = hotswap.require(&path).unwrap_err();
    assert!(matches!(err, HotswapError::Compile { .. }));
    assert_eq!(errors(&events).len(), 1);
    assert!(hotswap.tracked().is_empty());
}

// ============================================================================
// force_require Tests
// ============================================================================

#[test]
fn test_force_require_rejects_relative_requests() {
    let hotswap = engine();
    let events = hotswap.subscribe();

    for request in ["./rel/path", "../up.hot", ".\\win.hot", "..\\win.hot"] {
        let err = hotswap.force_require(request).unwrap_err();
        assert!(err.is_usage(), "{request}: {err}");
    }

    let errors = errors(&events);
    assert_eq!(errors.len(), 4);
    assert!(errors.iter().all(HotswapError::is_usage));
    assert!(hotswap.tracked().is_empty());
}

#[test]
fn test_force_require_tracks_unhooked_tag_temporarily() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "forced.json", r#"{"value": 1}"#);

    let hotswap = engine();
    let surface = hotswap.force_require(&path).unwrap();

    assert_eq!(surface.get("value"), Some(json!(1)));
    assert_eq!(hotswap.tracked(), vec![path]);
    assert!(hotswap.loader().handler(".json").is_none());
    assert!(!hotswap.config().extensions.contains(".json"));
}

#[test]
fn test_force_require_restores_hook_after_failure() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "broken.json", "{ nope");

    let loader = Arc::new(ModuleLoader::new(DataCompiler::new()));
    let original: Arc<dyn LoadHandler> =
        Arc::new(|loader: &ModuleLoader, path: &Path| loader.load_plain(path));
    loader.install(".json", original.clone());

    let hotswap = Hotswap::builder()
        .loader(loader.clone())
        .watch(false)
        .build()
        .unwrap();

    let err = hotswap.force_require(&path).unwrap_err();
    assert!(matches!(err, HotswapError::Compile { .. }));

    let restored = loader.handler(".json").unwrap();
    assert!(Arc::ptr_eq(&restored, &original));
}

#[test]
fn test_force_require_unknown_package() {
    let hotswap = engine();
    let events = hotswap.subscribe();

    let err = hotswap.force_require("no-such-package").unwrap_err();
    assert!(matches!(err, HotswapError::NotFound { .. }));
    assert_eq!(errors(&events).len(), 1);
}

#[test]
fn test_force_require_resolves_packages() {
    let dir = tempdir().unwrap();
    write_unit(&dir, "settings.hot", r#"{"limit": 5}"#);

    let loader = ModuleLoader::new(DataCompiler::new()).search_path(dir.path());
    let hotswap = Hotswap::builder()
        .loader(loader)
        .watch(false)
        .build()
        .unwrap();

    let surface = hotswap.force_require("settings").unwrap();
    assert_eq!(surface.get("limit"), Some(json!(5)));
    assert_eq!(hotswap.tracked(), vec![dir.path().join("settings.hot")]);
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_configure_diff_applies_watch() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "w.hot", r#"{"value": 1}"#);

    let hotswap = Hotswap::builder()
        .compiler(DataCompiler::new())
        .autoreload(false)
        .build()
        .unwrap();
    hotswap.require(&path).unwrap();
    assert_eq!(hotswap.watched(), vec![path.clone()]);

    let config = hotswap.configure(ConfigUpdate::new().watch(false));
    assert!(!config.watch);
    assert!(hotswap.watched().is_empty());

    // Unchanged flag: nothing happens.
    hotswap.configure(ConfigUpdate::new().watch(false));
    assert!(hotswap.watched().is_empty());

    let config = hotswap.configure(ConfigUpdate::new().watch(true));
    assert!(config.watch);
    assert_eq!(hotswap.watched(), vec![path]);
}

#[test]
fn test_configure_only_touches_given_keys() {
    let hotswap = engine();
    let before = hotswap.config();

    let after = hotswap.configure(ConfigUpdate::new().autoreload(false));
    assert!(!after.autoreload);
    assert_eq!(after.extensions, before.extensions);
    assert_eq!(after.watch, before.watch);

    let after = hotswap.configure(ConfigUpdate::new().extensions(["json", ".data"]));
    assert_eq!(
        after.extensions.into_iter().collect::<Vec<_>>(),
        vec![".data".to_string(), ".json".to_string()]
    );
    assert!(hotswap.loader().handler(".hot").is_none());
    assert!(hotswap.loader().handler(".json").is_some());

    assert_eq!(hotswap.configure(ConfigUpdate::new()), hotswap.config());
}

// ============================================================================
// Manual Reload and Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_reload_file_tracks_and_swaps() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "manual.json", r#"{"value": 1}"#);

    let hotswap = engine();
    let events = hotswap.subscribe();

    // An engine-triggered load always tracks the unit.
    assert!(hotswap.reload_file(&path).await);
    let held = hotswap.surface(&path).unwrap();

    fs::write(&path, r#"{"value": 2}"#).unwrap();
    assert!(hotswap.reload_file(&path).await);
    assert_eq!(held.get("value"), Some(json!(2)));
    assert_eq!(swaps(&events), vec![path.clone()]);

    // The loader cache points at the stable surface.
    assert!(hotswap.require(&path).unwrap().ptr_eq(&held));
}

#[tokio::test]
async fn test_reload_file_routes_unhooked_tag_through_loader() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "routed.json", r#"{"value": 1}"#);

    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = calls.clone();
    let loader = Arc::new(ModuleLoader::new(DataCompiler::new()));
    let original: Arc<dyn LoadHandler> = Arc::new(move |loader: &ModuleLoader, path: &Path| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        loader.load_plain(path)
    });
    loader.install(".json", original.clone());

    let hotswap = Hotswap::builder()
        .loader(loader.clone())
        .watch(false)
        .build()
        .unwrap();

    assert!(hotswap.reload_file(&path).await);
    let held = hotswap.surface(&path).unwrap();
    assert!(loader.cached(&path).unwrap().ptr_eq(&held));

    fs::write(&path, r#"{"value": 2}"#).unwrap();
    assert!(hotswap.reload_file(&path).await);
    assert_eq!(held.get("value"), Some(json!(2)));
    assert!(loader.cached(&path).unwrap().ptr_eq(&held));

    // The tag was hooked only while each reload ran.
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(Arc::ptr_eq(&loader.handler(".json").unwrap(), &original));
    assert!(!hotswap.config().extensions.contains(".json"));
    assert_eq!(hotswap.tracked(), vec![path]);
}

#[test]
fn test_on_swap_callback() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "cb.hot", r#"{"value": 1}"#);

    let (tx, rx) = crossbeam_channel::unbounded();
    let hotswap = Hotswap::builder()
        .compiler(DataCompiler::new())
        .watch(false)
        .on_swap(move |path| {
            let _ = tx.send(path.clone());
        })
        .build()
        .unwrap();

    hotswap.require(&path).unwrap();
    edit(&path, r#"{"value": 2}"#, 10);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    assert_eq!(runtime.block_on(hotswap.reconcile_now()), vec![path.clone()]);

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), path);
    hotswap.shutdown();
}

#[test]
fn test_shutdown_releases_hooks_and_watches() {
    let dir = tempdir().unwrap();
    let path = write_unit(&dir, "s.hot", r#"{"value": 1}"#);

    let hotswap = Hotswap::builder()
        .compiler(DataCompiler::new())
        .build()
        .unwrap();
    let held: Surface = hotswap.require(&path).unwrap();
    assert!(!hotswap.watched().is_empty());

    hotswap.shutdown();
    assert!(hotswap.is_shut_down());
    assert!(hotswap.watched().is_empty());
    assert!(hotswap.loader().handler(".hot").is_none());

    // Surfaces stay usable after shutdown.
    assert_eq!(held.get("value"), Some(json!(1)));
}
