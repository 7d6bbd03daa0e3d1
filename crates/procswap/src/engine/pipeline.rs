//! The apply pipeline: one unit from source text to active behavior.
//!
//! ```text
//! Reading -> Compiling -> Classifying -> FirstLoad | Reload | Rejected -> WatchArm -> Done
//! ```
//!
//! Every failure is published on the event bus and ends only the apply of
//! that one unit.

use std::path::Path;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use tracing::{debug, info};

use super::EngineInner;
use crate::error::HotswapError;
use crate::event::HotswapEvent;
use crate::loader::{LoadHandler, ModuleLoader};
use crate::registry::UnitRegistry;
use crate::surface::Surface;

/// Result of applying one unit.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    /// A tracked unit was loaded for the first time.
    Loaded(Surface),

    /// A tracked unit was reloaded in place.
    Swapped(Surface),

    /// The unit did not ask to be tracked and was loaded once.
    Untracked(Surface),

    /// A reload was refused; the existing surface stays active.
    Rejected {
        /// The unchanged stable surface.
        surface: Surface,

        /// Why the reload was refused.
        error: HotswapError,
    },

    /// The unit could not be loaded and has no previous version.
    Failed(HotswapError),
}

impl ApplyOutcome {
    /// Returns the surface the loader should hand out, if any.
    #[must_use]
    pub fn surface(&self) -> Option<&Surface> {
        match self {
            Self::Loaded(surface)
            | Self::Swapped(surface)
            | Self::Untracked(surface)
            | Self::Rejected { surface, .. } => Some(surface),
            Self::Failed(_) => None,
        }
    }

    /// Returns the error of a rejected or failed apply.
    #[must_use]
    pub fn error(&self) -> Option<&HotswapError> {
        match self {
            Self::Rejected { error, .. } | Self::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Returns `true` for an in-place reload.
    #[must_use]
    pub const fn is_swap(&self) -> bool {
        matches!(self, Self::Swapped(_))
    }

    /// Returns `true` if new code became active.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Loaded(_) | Self::Swapped(_) | Self::Untracked(_))
    }

    /// Converts into what a loader returns: rejected reloads still yield the
    /// existing surface.
    pub fn into_result(self) -> Result<Surface, HotswapError> {
        match self {
            Self::Loaded(surface)
            | Self::Swapped(surface)
            | Self::Untracked(surface)
            | Self::Rejected { surface, .. } => Ok(surface),
            Self::Failed(error) => Err(error),
        }
    }
}

/// Source text read ahead of an engine-triggered apply.
pub(crate) struct Fetched {
    content: String,
    /// Modification time observed before the read.
    modified: Option<SystemTime>,
}

/// Marks applies as engine-triggered for as long as it is alive.
struct ReloadGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ReloadGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        let was_set = flag.swap(true, Ordering::AcqRel);
        debug_assert!(!was_set, "engine-triggered applies must not nest");
        Self { flag }
    }
}

impl Drop for ReloadGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl EngineInner {
    /// Runs the pipeline for `path`.
    ///
    /// Callers hold the apply lock.
    pub(crate) fn apply(&self, path: &Path) -> ApplyOutcome {
        let engine_triggered = self.reloading.load(Ordering::Acquire);
        let was_tracked = self.registry.contains(path);

        let prefetched = self.fetched.lock().remove(path);
        let (source, stamp) = match prefetched {
            Some(Fetched { content, modified }) => (content, modified),
            None => {
                let stamp = self.reader.fs().modified_sync(path);
                match self.loader.read_source(path) {
                    Ok(content) => (content, stamp),
                    Err(err) => return self.reject(path, err),
                }
            }
        };

        let module = match self.loader.compile(path, &source) {
            Ok(module) => module,
            Err(err) => {
                let outcome = self.reject(path, err);
                if engine_triggered || was_tracked {
                    self.finish_tracked(path, stamp);
                }
                return outcome;
            }
        };

        let tracked = engine_triggered || was_tracked || module.wants_tracking();
        if !tracked {
            debug!(path = %path.display(), "untracked load");
            return ApplyOutcome::Untracked(UnitRegistry::untracked(&module));
        }

        let outcome = if was_tracked {
            match self.registry.reload(path, module) {
                Ok(surface) => {
                    info!(path = %path.display(), "reloaded unit");
                    self.bus.emit(HotswapEvent::Swap(path.to_path_buf()));
                    ApplyOutcome::Swapped(surface)
                }
                Err(err) => self.reject(path, err),
            }
        } else {
            match self.registry.first_load(path, module) {
                Ok(surface) => {
                    debug!(path = %path.display(), "loaded unit");
                    ApplyOutcome::Loaded(surface)
                }
                Err(err) => self.reject(path, err),
            }
        };

        self.finish_tracked(path, stamp);
        outcome
    }

    /// Applies content fetched ahead of time as an engine-triggered reload.
    ///
    /// The load is dispatched through the host loader, with the unit's tag
    /// hooked for its duration, so the loader's cache ends up holding the
    /// resulting surface. `modified` is recorded as the applied time.
    pub(crate) fn apply_fetched(
        &self,
        path: &Path,
        content: String,
        modified: Option<SystemTime>,
    ) -> ApplyOutcome {
        let _lock = self.apply_lock.lock();
        let _hook = self.hooks.temporary(&self.loader.tag_of(path));

        self.fetched
            .lock()
            .insert(path.to_path_buf(), Fetched { content, modified });
        self.loader.evict(path);

        let result = {
            let _flag = ReloadGuard::set(&self.reloading);
            self.loader.load_resolved(path.to_path_buf())
        };
        self.fetched.lock().remove(path);

        // No outcome means another handler took the tag over after it was hooked.
        self.reload_outcome
            .lock()
            .take()
            .unwrap_or_else(|| match result {
                Ok(surface) => ApplyOutcome::Untracked(surface),
                Err(error) => ApplyOutcome::Failed(error),
            })
    }

    /// Reports `error` and keeps the existing surface active, if any.
    fn reject(&self, path: &Path, error: HotswapError) -> ApplyOutcome {
        self.bus.error(error.clone());
        match self.registry.surface(path) {
            Some(surface) => ApplyOutcome::Rejected { surface, error },
            None => ApplyOutcome::Failed(error),
        }
    }

    /// Arms the unit's watch if needed and records `stamp` as its applied
    /// modification time.
    ///
    /// Runs whether or not the apply succeeded, so a broken edit is not
    /// picked up again until the file changes.
    fn finish_tracked(&self, path: &Path, stamp: Option<SystemTime>) {
        if !self.registry.contains(path) {
            return;
        }

        if self.watch.is_enabled()
            && !self.watch.is_armed(path)
            && let Err(err) = self.watch.arm(path)
        {
            self.bus.error(err);
        }

        self.registry.mark_applied(path, stamp);
    }
}

/// The handler the engine installs for intercepted tags.
pub(crate) struct Interceptor {
    pub(crate) engine: Weak<EngineInner>,
}

impl LoadHandler for Interceptor {
    fn load(&self, loader: &ModuleLoader, path: &Path) -> Result<Surface, HotswapError> {
        let Some(engine) = self.engine.upgrade() else {
            return loader.load_plain(path);
        };

        let _lock = engine.apply_lock.lock();
        let outcome = engine.apply(path);
        if engine.reloading.load(Ordering::Acquire) {
            *engine.reload_outcome.lock() = Some(outcome.clone());
        }
        outcome.into_result()
    }
}
