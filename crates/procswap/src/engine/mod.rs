//! The hot-swap engine.
//!
//! [`EngineInner`] is the explicit engine context: it owns the loader hooks,
//! the unit registry, the resilient reader, the watch feed and the event bus.
//! [`Hotswap`] is the cloneable handle applications hold; it is built by
//! [`HotswapBuilder`].

mod builder;
mod handle;
mod pipeline;
mod reconcile;

pub use builder::HotswapBuilder;
pub use handle::Hotswap;
pub use pipeline::ApplyOutcome;

use pipeline::Fetched;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::config::{ConfigUpdate, HotswapConfig};
use crate::error::HotswapError;
use crate::event::{EventBus, HotswapEvent};
use crate::hook::ExtensionHooks;
use crate::loader::{ModuleLoader, is_relative_request};
use crate::registry::UnitRegistry;
use crate::source::ResilientReader;
use crate::surface::Surface;
use crate::watch::{Dispatcher, WatchFeed};

/// Shared engine state behind every [`Hotswap`] handle.
pub(crate) struct EngineInner {
    pub(crate) loader: Arc<ModuleLoader>,
    pub(crate) hooks: ExtensionHooks,
    pub(crate) registry: UnitRegistry,
    pub(crate) reader: ResilientReader,
    pub(crate) watch: WatchFeed,
    pub(crate) bus: EventBus,

    autoreload: AtomicBool,
    debounce: Duration,

    /// Set while the engine itself drives an apply.
    pub(crate) reloading: AtomicBool,
    /// Serializes applies. Reentrant: an engine-triggered reload holds it
    /// while the loader dispatches back into the interceptor.
    pub(crate) apply_lock: ReentrantMutex<()>,
    /// Content read ahead of an engine-triggered apply.
    pub(crate) fetched: Mutex<HashMap<PathBuf, Fetched>>,
    /// Outcome of the engine-triggered apply in progress.
    pub(crate) reload_outcome: Mutex<Option<ApplyOutcome>>,

    config_lock: Mutex<()>,
    dispatcher: OnceLock<Dispatcher>,
    callbacks: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl EngineInner {
    /// Returns the current configuration.
    pub(crate) fn config(&self) -> HotswapConfig {
        HotswapConfig {
            extensions: self.hooks.tags(),
            watch: self.watch.is_enabled(),
            autoreload: self.autoreload.load(Ordering::Acquire),
            retry_delays_ms: self
                .reader
                .schedule()
                .delays()
                .iter()
                .map(|delay| u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
                .collect(),
            debounce_ms: u64::try_from(self.debounce.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Applies the keys present in `update`.
    ///
    /// The watch flag is diff-applied: turning it on arms every tracked unit,
    /// turning it off disarms everything, leaving it unchanged does nothing.
    pub(crate) fn configure(&self, update: &ConfigUpdate) -> HotswapConfig {
        let _guard = self.config_lock.lock();

        if let Some(autoreload) = update.autoreload {
            self.autoreload.store(autoreload, Ordering::Release);
        }

        if let Some(extensions) = &update.extensions {
            let tags = self.hooks.set_tags(extensions);
            debug!(?tags, "hooked tags updated");
        }

        if let Some(watch) = update.watch
            && watch != self.watch.is_enabled()
        {
            if watch {
                for err in self.watch.arm_all(&self.registry.paths()) {
                    self.bus.error(err);
                }
            } else {
                self.watch.disarm_all();
            }
            info!(watch, "watching toggled");
        }

        self.config()
    }

    /// Loads `request` through the engine regardless of its tag.
    pub(crate) fn force_require(&self, request: &Path) -> Result<Surface, HotswapError> {
        let display = request.to_string_lossy();
        if is_relative_request(&display) {
            let err = HotswapError::usage(
                display.as_ref(),
                "relative requests cannot be resolved by the engine",
            );
            self.bus.error(err.clone());
            return Err(err);
        }

        let path = match self.loader.resolve(&display) {
            Ok(path) => path,
            Err(err) => {
                self.bus.error(err.clone());
                return Err(err);
            }
        };

        let _hook = self.hooks.temporary(&self.loader.tag_of(&path));
        self.loader.require(&path)
    }

    /// Handles a change reported by the dispatcher.
    pub(crate) fn on_file_event(&self, path: &Path, runtime: &Runtime) {
        let Some(unit) = self.watch.matches(path) else {
            return;
        };

        self.bus.emit(HotswapEvent::Change(unit.clone()));
        if self.autoreload.load(Ordering::Acquire) {
            runtime.block_on(self.reload_file(&unit));
        }
    }

    /// Reads `path` through the resilient reader and reloads it.
    ///
    /// Returns `None` when the read gave up.
    pub(crate) async fn reload_file(&self, path: &Path) -> Option<ApplyOutcome> {
        let modified = self.reader.fs().modified(path).await.ok();
        let content = self.reader.read_failsafe(path, &self.watch, &self.bus).await?;
        Some(self.apply_fetched(path, content, modified))
    }

    /// Releases every hook, disarms every watch and stops the threads.
    pub(crate) fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.hooks.release_all();
        self.watch.disarm_all();
        if let Some(dispatcher) = self.dispatcher.get() {
            dispatcher.stop();
        }
        self.bus.close();

        if let Some(handle) = self.callbacks.lock().take()
            && handle.thread().id() != thread::current().id()
            && handle.join().is_err()
        {
            warn!("callback thread panicked");
        }

        info!("hotswap engine shut down");
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for EngineInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineInner")
            .field("config", &self.config())
            .field("tracked", &self.registry.len())
            .field("watch", &self.watch)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
