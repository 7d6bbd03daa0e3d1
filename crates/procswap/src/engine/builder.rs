//! Builder for the hot-swap engine.
//!
//! The [`HotswapBuilder`] provides a fluent API for choosing the compiler,
//! the filesystem, the initial configuration and event callbacks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::info;

use super::pipeline::Interceptor;
use super::{EngineInner, Hotswap};
use crate::config::HotswapConfig;
use crate::error::HotswapError;
use crate::event::{Callbacks, EventBus};
use crate::hook::ExtensionHooks;
use crate::loader::{Compiler, LoadHandler, ModuleLoader};
use crate::registry::UnitRegistry;
use crate::source::{ResilientReader, RetrySchedule, SourceFs, TokioFs};
use crate::watch::{self, Dispatcher, WatchFeed};

/// Builder for [`Hotswap`].
///
/// Default settings follow [`HotswapConfig::default`]:
/// - `.hot` files are routed through the engine
/// - watching and autoreload are on
/// - reads are retried after 100ms, 300ms and 1000ms
/// - change events are debounced for 100ms
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use procswap::{DataCompiler, Hotswap};
///
/// let hotswap = Hotswap::builder()
///     .compiler(DataCompiler::new())
///     .extensions([".hot", ".json"])
///     .debounce(Duration::from_millis(200))
///     .on_swap(|path| println!("reloaded {}", path.display()))
///     .on_error(|err| eprintln!("reload failed: {err}"))
///     .build()?;
/// # Ok::<(), procswap::HotswapError>(())
/// ```
pub struct HotswapBuilder {
    loader: Option<Arc<ModuleLoader>>,
    compiler: Option<Arc<dyn Compiler>>,
    source_fs: Arc<dyn SourceFs>,
    config: HotswapConfig,
    callbacks: Callbacks,
}

impl HotswapBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            loader: None,
            compiler: None,
            source_fs: Arc::new(TokioFs),
            config: HotswapConfig::default(),
            callbacks: Callbacks::default(),
        }
    }

    /// Sets the compile primitive; a loader without search roots is created
    /// around it.
    #[must_use]
    pub fn compiler(mut self, compiler: impl Compiler + 'static) -> Self {
        self.compiler = Some(Arc::new(compiler));
        self
    }

    /// Uses an existing host loader. Takes precedence over
    /// [`compiler`](Self::compiler).
    #[must_use]
    pub fn loader(mut self, loader: impl Into<Arc<ModuleLoader>>) -> Self {
        self.loader = Some(loader.into());
        self
    }

    /// Sets the filesystem used for change reads and stats.
    #[must_use]
    pub fn source_fs(mut self, fs: impl SourceFs + 'static) -> Self {
        self.source_fs = Arc::new(fs);
        self
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: HotswapConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the tags routed through the engine.
    #[must_use]
    pub fn extensions<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.extensions = tags
            .into_iter()
            .map(|tag| crate::hook::normalize_tag(tag.as_ref()))
            .collect();
        self
    }

    /// Turns watching of tracked units on or off.
    #[must_use]
    pub const fn watch(mut self, watch: bool) -> Self {
        self.config.watch = watch;
        self
    }

    /// Turns automatic reloads on change on or off.
    #[must_use]
    pub const fn autoreload(mut self, autoreload: bool) -> Self {
        self.config.autoreload = autoreload;
        self
    }

    /// Sets the delays between read attempts.
    #[must_use]
    pub fn retry_schedule(mut self, schedule: &RetrySchedule) -> Self {
        self.config.retry_delays_ms = schedule
            .delays()
            .iter()
            .map(|delay| u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
            .collect();
        self
    }

    /// Sets the debounce window for change events.
    #[must_use]
    pub fn debounce(mut self, duration: Duration) -> Self {
        self.config.debounce_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Called with the unit path for every change notification.
    #[must_use]
    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PathBuf) + Send + Sync + 'static,
    {
        self.callbacks.on_change = Some(Arc::new(callback));
        self
    }

    /// Called with the unit path after every successful reload.
    #[must_use]
    pub fn on_swap<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PathBuf) + Send + Sync + 'static,
    {
        self.callbacks.on_swap = Some(Arc::new(callback));
        self
    }

    /// Called for every reported error.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&HotswapError) + Send + Sync + 'static,
    {
        self.callbacks.on_error = Some(Arc::new(callback));
        self
    }

    /// Starts the engine.
    ///
    /// Hooks the configured tags, creates the file watcher and starts the
    /// dispatcher thread.
    ///
    /// # Errors
    ///
    /// Returns [`HotswapError::Init`] when neither a compiler nor a loader was
    /// given, or when the file watcher or a thread could not start.
    pub fn build(self) -> Result<Hotswap, HotswapError> {
        let loader = match (self.loader, self.compiler) {
            (Some(loader), _) => loader,
            (None, Some(compiler)) => Arc::new(ModuleLoader::with_compiler(compiler)),
            (None, None) => {
                return Err(HotswapError::init(
                    "a compiler or a module loader is required",
                ));
            }
        };

        let (watcher, notify_rx) = watch::notify_channel()?;
        let debounce = self.config.debounce();

        let inner = Arc::new_cyclic(|engine: &Weak<EngineInner>| {
            let handler: Arc<dyn LoadHandler> = Arc::new(Interceptor {
                engine: engine.clone(),
            });
            EngineInner {
                hooks: ExtensionHooks::new(loader.clone(), handler),
                loader,
                registry: UnitRegistry::new(),
                reader: ResilientReader::new(self.source_fs, self.config.retry_schedule()),
                watch: WatchFeed::new(watcher, self.config.watch),
                bus: EventBus::new(),
                autoreload: AtomicBool::new(self.config.autoreload),
                debounce,
                reloading: AtomicBool::new(false),
                apply_lock: ReentrantMutex::new(()),
                fetched: Mutex::new(HashMap::new()),
                reload_outcome: Mutex::new(None),
                config_lock: Mutex::new(()),
                dispatcher: OnceLock::new(),
                callbacks: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }
        });

        inner.hooks.set_tags(&self.config.extensions);

        let dispatcher = Dispatcher::spawn(Arc::downgrade(&inner), notify_rx, debounce)?;
        let _ = inner.dispatcher.set(dispatcher);
        *inner.callbacks.lock() = self.callbacks.spawn(&inner.bus)?;

        info!(
            extensions = ?self.config.extensions,
            watch = self.config.watch,
            autoreload = self.config.autoreload,
            "hotswap engine started"
        );
        Ok(Hotswap { inner })
    }
}

impl Default for HotswapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HotswapBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotswapBuilder")
            .field("loader", &self.loader)
            .field("has_compiler", &self.compiler.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
