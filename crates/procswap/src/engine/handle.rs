//! User-facing handle for the engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Receiver;

use super::EngineInner;
use crate::config::{ConfigUpdate, HotswapConfig};
use crate::error::HotswapError;
use crate::event::HotswapEvent;
use crate::loader::ModuleLoader;
use crate::registry::TrackedUnit;
use crate::source::absolutize;
use crate::surface::Surface;

/// Handle for loading, reloading and inspecting hot-swappable units.
///
/// `Hotswap` is cheaply cloneable; all clones share one engine. The engine
/// shuts down when [`shutdown`](Self::shutdown) is called or the last clone
/// is dropped.
///
/// # Example
///
/// ```no_run
/// use procswap::{DataCompiler, Hotswap};
///
/// # async fn run() -> procswap::Result<()> {
/// let hotswap = Hotswap::builder().compiler(DataCompiler::new()).build()?;
///
/// let settings = hotswap.require("/srv/app/settings.hot")?;
/// println!("limit = {:?}", settings.get("limit"));
///
/// // Later, pick up every edit made while the process was busy.
/// let reloaded = hotswap.reconcile_now().await;
/// println!("{} units reloaded", reloaded.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Hotswap {
    pub(super) inner: Arc<EngineInner>,
}

impl Hotswap {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> super::HotswapBuilder {
        super::HotswapBuilder::new()
    }

    /// Applies the keys present in `update` and returns the resulting
    /// configuration.
    pub fn configure(&self, update: ConfigUpdate) -> HotswapConfig {
        self.inner.configure(&update)
    }

    /// Returns the current configuration.
    #[must_use]
    pub fn config(&self) -> HotswapConfig {
        self.inner.config()
    }

    /// Loads a unit through the engine whatever its tag.
    ///
    /// `request` is an absolute path or a package name resolved against the
    /// loader's search roots. Relative requests (`./x`, `../x`) are reported
    /// as [`HotswapError::Usage`] and nothing is loaded.
    pub fn force_require(&self, request: impl AsRef<Path>) -> Result<Surface, HotswapError> {
        self.inner.force_require(request.as_ref())
    }

    /// Loads a unit through the loader.
    ///
    /// Hooked tags go through the engine; other tags load plainly.
    pub fn require(&self, request: impl AsRef<Path>) -> Result<Surface, HotswapError> {
        self.inner.loader.require(request)
    }

    /// Reloads every tracked unit whose file changed since it was last applied.
    ///
    /// Returns the paths that were swapped.
    pub async fn reconcile_now(&self) -> Vec<PathBuf> {
        self.inner.reconcile().await
    }

    /// Reloads one unit as if its file had changed.
    ///
    /// Returns `true` if new code became active.
    pub async fn reload_file(&self, path: impl AsRef<Path>) -> bool {
        let path = absolutize(path.as_ref());
        self.inner
            .reload_file(&path)
            .await
            .is_some_and(|outcome| outcome.is_applied())
    }

    /// Returns the stable surface of a tracked unit.
    #[must_use]
    pub fn surface(&self, path: impl AsRef<Path>) -> Option<Surface> {
        self.inner.registry.surface(&absolutize(path.as_ref()))
    }

    /// Returns the tracked state of a unit.
    #[must_use]
    pub fn unit(&self, path: impl AsRef<Path>) -> Option<TrackedUnit> {
        self.inner.registry.unit(&absolutize(path.as_ref()))
    }

    /// Returns every tracked path, sorted.
    #[must_use]
    pub fn tracked(&self) -> Vec<PathBuf> {
        self.inner.registry.paths()
    }

    /// Returns the paths with an armed watch, sorted.
    #[must_use]
    pub fn watched(&self) -> Vec<PathBuf> {
        self.inner.watch.armed()
    }

    /// Subscribes to engine events.
    ///
    /// Every subscriber receives every event emitted after it subscribed.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<HotswapEvent> {
        self.inner.bus.subscribe()
    }

    /// Returns the host loader.
    #[must_use]
    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.inner.loader
    }

    /// Releases every hook, disarms every watch and stops the engine threads.
    ///
    /// Calling it more than once has no further effect.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Returns `true` once the engine has shut down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }
}

impl std::fmt::Debug for Hotswap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hotswap").field("engine", &self.inner).finish()
    }
}
