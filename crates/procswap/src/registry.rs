//! Tracked units and their stable surfaces.
//!
//! [`UnitRegistry`] keeps one stable [`Surface`] per tracked path for the
//! lifetime of the engine. A first load creates it; every later reload copies
//! the new exports into it, so holders of the surface observe the change
//! without re-requesting the unit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::HotswapError;
use crate::surface::{Module, Surface, SurfaceError, SurfaceKind};

/// State kept for one tracked unit.
#[derive(Clone, Debug)]
pub struct TrackedUnit {
    surface: Surface,
    module: Arc<Module>,
    kind: SurfaceKind,
    applied_mtime: Option<SystemTime>,
}

impl TrackedUnit {
    /// Returns the stable surface.
    #[must_use]
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Returns the most recently applied module.
    #[must_use]
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    /// Returns the kind recorded on first load.
    #[must_use]
    pub const fn kind(&self) -> SurfaceKind {
        self.kind
    }

    /// Returns the modification time recorded after the last apply.
    #[must_use]
    pub const fn applied_mtime(&self) -> Option<SystemTime> {
        self.applied_mtime
    }
}

/// Registry of tracked units.
#[derive(Debug, Default)]
pub struct UnitRegistry {
    units: RwLock<HashMap<PathBuf, TrackedUnit>>,
}

impl UnitRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `path` with a new stable surface.
    ///
    /// If the path is already tracked this is a reload.
    pub fn first_load(&self, path: &Path, module: Module) -> Result<Surface, HotswapError> {
        if self.contains(path) {
            return self.reload(path, module);
        }

        let surface = Surface::from_exports(module.exports().clone());
        let kind = surface.kind();
        debug!(path = %path.display(), kind = %kind, "tracking unit");

        self.units.write().insert(
            path.to_path_buf(),
            TrackedUnit {
                surface: surface.clone(),
                module: Arc::new(module),
                kind,
                applied_mtime: None,
            },
        );
        Ok(surface)
    }

    /// Copies the exports of `module` into the stable surface of `path`.
    ///
    /// The previous members are wiped and the new ones published in one swap.
    /// A kind change is rejected without touching the surface. If the new
    /// module carries a migration hook it runs after the swap, with the
    /// previous and the new module; when it fails the previous contents are
    /// put back.
    pub fn reload(&self, path: &Path, module: Module) -> Result<Surface, HotswapError> {
        let unit = self.units.read().get(path).cloned();
        let Some(unit) = unit else {
            return self.first_load(path, module);
        };

        let prior = unit.surface.replace(module.exports().clone()).map_err(|err| match err {
            SurfaceError::KindMismatch { expected, found } => {
                HotswapError::incompatible_shape(path, expected, found)
            }
            other => HotswapError::compile(path, other.to_string()),
        })?;

        if let Some(hook) = module.migration()
            && let Err(err) = hook(&unit.module, &module)
        {
            warn!(path = %path.display(), error = %err, "migration failed, rolling back");
            unit.surface.restore(prior);
            return Err(HotswapError::migration(path, err.to_string()));
        }

        if let Some(tracked) = self.units.write().get_mut(path) {
            tracked.module = Arc::new(module);
        }
        debug!(path = %path.display(), epoch = unit.surface.epoch(), "swapped unit");
        Ok(unit.surface)
    }

    /// Creates a detached surface for a unit that does not want tracking.
    #[must_use]
    pub fn untracked(module: &Module) -> Surface {
        Surface::from_exports(module.exports().clone())
    }

    /// Returns the stable surface of `path`.
    pub fn surface(&self, path: &Path) -> Option<Surface> {
        self.units.read().get(path).map(|unit| unit.surface.clone())
    }

    /// Returns the tracked state of `path`.
    pub fn unit(&self, path: &Path) -> Option<TrackedUnit> {
        self.units.read().get(path).cloned()
    }

    /// Returns `true` if `path` is tracked.
    pub fn contains(&self, path: &Path) -> bool {
        self.units.read().contains_key(path)
    }

    /// Returns every tracked path, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.units.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Returns every tracked path with its recorded modification time.
    pub fn snapshots(&self) -> Vec<(PathBuf, Option<SystemTime>)> {
        let mut snapshots: Vec<_> = self
            .units
            .read()
            .iter()
            .map(|(path, unit)| (path.clone(), unit.applied_mtime))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }

    /// Records the modification time of `path` after an apply.
    pub fn mark_applied(&self, path: &Path, mtime: Option<SystemTime>) {
        if let Some(unit) = self.units.write().get_mut(path) {
            unit.applied_mtime = mtime;
        }
    }

    /// Returns the number of tracked units.
    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    /// Returns `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{Accessor, Exports, MigrationError};
    use parking_lot::Mutex;
    use serde_json::json;

    fn object(value: i64) -> Module {
        Module::new(Exports::object().with_value("value", value)).managed()
    }

    #[test]
    fn test_reload_preserves_identity() {
        let registry = UnitRegistry::new();
        let path = Path::new("/x.mod");

        let held = registry.first_load(path, object(1)).unwrap();
        let id = held.id();

        for n in 2..5 {
            let surface = registry.reload(path, object(n)).unwrap();
            assert!(surface.ptr_eq(&held));
        }

        assert_eq!(held.id(), id);
        assert_eq!(held.get("value"), Some(json!(4)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reload_rejects_kind_change() {
        let registry = UnitRegistry::new();
        let path = Path::new("/x.mod");
        let held = registry.first_load(path, object(1)).unwrap();

        let err = registry
            .reload(path, Module::new(Exports::callable(|_| json!(null))))
            .unwrap_err();

        assert!(err.is_incompatible_shape());
        assert_eq!(held.get("value"), Some(json!(1)));
        assert_eq!(held.epoch(), 0);
        assert_eq!(registry.unit(path).unwrap().kind(), SurfaceKind::Object);
    }

    #[test]
    fn test_migration_hook_receives_previous_and_new() {
        let registry = UnitRegistry::new();
        let path = Path::new("/m.mod");
        registry.first_load(path, object(1)).unwrap();

        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let next = Module::new(Exports::object().with_value("value", 2)).with_migration(
            move |old: &Module, new: &Module| {
                *sink.lock() = Some((
                    old.exports().members()["value"].read(),
                    new.exports().members()["value"].read(),
                ));
                Ok(())
            },
        );

        registry.reload(path, next).unwrap();
        assert_eq!(*seen.lock(), Some((Some(json!(1)), Some(json!(2)))));
        assert!(registry.unit(path).unwrap().module().migration().is_some());
    }

    #[test]
    fn test_failed_migration_rolls_back() {
        let registry = UnitRegistry::new();
        let path = Path::new("/m.mod");
        let held = registry.first_load(path, object(1)).unwrap();

        let next = Module::new(Exports::object().with_value("value", 2))
            .with_migration(|_: &Module, _: &Module| Err(MigrationError::new("state lost")));

        let err = registry.reload(path, next).unwrap_err();
        assert!(matches!(err, HotswapError::Migration { .. }));
        assert_eq!(held.get("value"), Some(json!(1)));

        // The module on record is still the first one.
        assert!(registry.unit(path).unwrap().module().migration().is_none());
    }

    #[test]
    fn test_accessor_survives_reload_as_pair() {
        let registry = UnitRegistry::new();
        let path = Path::new("/acc.mod");
        let state = Arc::new(Mutex::new(json!(0)));

        let make = |state: Arc<Mutex<serde_json::Value>>| {
            let read = state.clone();
            Module::new(Exports::object().with_accessor(
                "count",
                Accessor::new()
                    .getter(move || read.lock().clone())
                    .setter(move |v| *state.lock() = v),
            ))
            .managed()
        };

        let held = registry.first_load(path, make(state.clone())).unwrap();
        registry.reload(path, make(state.clone())).unwrap();

        held.set("count", json!(9)).unwrap();
        assert_eq!(held.get("count"), Some(json!(9)));
        assert_eq!(*state.lock(), json!(9));
    }

    #[test]
    fn test_snapshots_and_mark_applied() {
        let registry = UnitRegistry::new();
        registry.first_load(Path::new("/b"), object(1)).unwrap();
        registry.first_load(Path::new("/a"), object(1)).unwrap();

        let now = SystemTime::now();
        registry.mark_applied(Path::new("/a"), Some(now));

        assert_eq!(
            registry.snapshots(),
            vec![(PathBuf::from("/a"), Some(now)), (PathBuf::from("/b"), None)]
        );
        assert_eq!(registry.paths(), vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }
}
