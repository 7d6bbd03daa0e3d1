//! Per-unit filesystem watches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::HotswapError;
use crate::source::WatchGate;

#[derive(Default)]
struct Armed {
    /// Armed unit path -> the path notify actually watches for it.
    units: HashMap<PathBuf, PathBuf>,
    /// Watched path -> number of units relying on it.
    targets: HashMap<PathBuf, usize>,
    /// Canonical path -> armed path, for files reached through symlinks.
    aliases: HashMap<PathBuf, PathBuf>,
}

impl Armed {
    /// Records `path` as watched through `target`.
    fn insert(&mut self, path: &Path, target: &Path) {
        self.units.insert(path.to_path_buf(), target.to_path_buf());
        if let Some(canonical) = canonical_unit_path(path)
            && canonical != path
        {
            self.aliases.insert(canonical, path.to_path_buf());
        }

        *self.targets.entry(target.to_path_buf()).or_insert(0) += 1;
    }

    /// Forgets `path`, returning the target it was watched through.
    fn remove(&mut self, path: &Path) -> Option<PathBuf> {
        let target = self.units.remove(path)?;
        self.aliases.retain(|_, armed| armed.as_path() != path);
        Some(target)
    }

    /// Drops one reference to `target`. Returns `true` once nothing relies
    /// on it.
    fn release(&mut self, target: &Path) -> bool {
        let Some(count) = self.targets.get_mut(target) else {
            return false;
        };
        *count -= 1;
        if *count > 0 {
            return false;
        }
        self.targets.remove(target);
        true
    }

    fn lookup(&self, path: &Path) -> Option<PathBuf> {
        if self.units.contains_key(path) {
            return Some(path.to_path_buf());
        }
        self.aliases.get(path).cloned()
    }
}

/// Picks what to watch for `path`: the file itself, or its parent directory
/// while the file does not exist.
fn watch_target(path: &Path) -> Result<PathBuf, HotswapError> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    match path.parent() {
        Some(parent) if parent.is_dir() => Ok(parent.to_path_buf()),
        Some(_) => Err(HotswapError::watch(
            path,
            "neither file nor parent directory exists",
        )),
        None => Err(HotswapError::watch(path, "invalid path")),
    }
}

/// Resolves symlinks in `path`, or in its parent when the file is missing.
fn canonical_unit_path(path: &Path) -> Option<PathBuf> {
    path.canonicalize().ok().or_else(|| {
        let parent = path.parent()?.canonicalize().ok()?;
        Some(parent.join(path.file_name()?))
    })
}

/// The set of armed watches plus the global watch flag.
///
/// A unit whose file is missing is watched through its parent directory, so
/// it is noticed when the file comes back.
pub struct WatchFeed {
    watcher: Mutex<RecommendedWatcher>,
    armed: Mutex<Armed>,
    enabled: AtomicBool,
}

impl WatchFeed {
    /// Creates a feed around a notify watcher.
    pub fn new(watcher: RecommendedWatcher, enabled: bool) -> Self {
        Self {
            watcher: Mutex::new(watcher),
            armed: Mutex::new(Armed::default()),
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Returns the global watch flag.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Returns `true` if `path` has an armed watch.
    pub fn is_armed(&self, path: &Path) -> bool {
        self.armed.lock().units.contains_key(path)
    }

    /// Returns the armed paths, sorted.
    pub fn armed(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.armed.lock().units.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Watches `path`. Returns `false` if it was already armed.
    pub fn arm(&self, path: &Path) -> Result<bool, HotswapError> {
        let mut armed = self.armed.lock();
        if armed.units.contains_key(path) {
            return Ok(false);
        }

        let target = watch_target(path)?;
        if !armed.targets.contains_key(&target) {
            self.watcher
                .lock()
                .watch(&target, RecursiveMode::NonRecursive)
                .map_err(|e| HotswapError::watch(path, format!("failed to watch: {e}")))?;
        }

        armed.insert(path, &target);
        debug!(path = %path.display(), target = %target.display(), "armed watch");
        Ok(true)
    }

    /// Stops watching `path`. Returns `false` if it was not armed.
    pub fn disarm(&self, path: &Path) -> bool {
        let mut armed = self.armed.lock();
        let Some(target) = armed.remove(path) else {
            return false;
        };

        // The file may already be gone, which also drops the watch.
        if armed.release(&target) {
            let _ = self.watcher.lock().unwatch(&target);
        }
        debug!(path = %path.display(), "disarmed watch");
        true
    }

    /// Removes every watch and turns the global flag off.
    pub fn disarm_all(&self) {
        self.enabled.store(false, Ordering::Release);
        let mut armed = self.armed.lock();
        let mut watcher = self.watcher.lock();
        for (target, _) in armed.targets.drain() {
            let _ = watcher.unwatch(&target);
        }
        armed.units.clear();
        armed.aliases.clear();
        debug!("disarmed all watches");
    }

    /// Turns the global flag on and arms every path in `paths`.
    ///
    /// Paths that cannot be watched are skipped and returned as errors.
    pub fn arm_all<'a, I>(&self, paths: I) -> Vec<HotswapError>
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        self.enabled.store(true, Ordering::Release);
        paths
            .into_iter()
            .filter_map(|path| self.arm(path).err())
            .collect()
    }

    /// Maps a path reported by notify to the armed path it belongs to.
    ///
    /// Events for other files in a watched directory map to nothing.
    pub fn matches(&self, path: &Path) -> Option<PathBuf> {
        let armed = self.armed.lock();
        armed.lookup(path).or_else(|| {
            canonical_unit_path(path).and_then(|canonical| armed.lookup(&canonical))
        })
    }
}

impl WatchGate for WatchFeed {
    fn pause(&self, path: &Path) {
        self.disarm(path);
    }

    fn resume(&self, path: &Path) {
        if !self.is_enabled() {
            return;
        }
        if let Err(err) = self.arm(path) {
            debug!(path = %path.display(), error = %err, "could not re-arm watch");
        }
    }
}

impl std::fmt::Debug for WatchFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchFeed")
            .field("enabled", &self.is_enabled())
            .field("armed", &self.armed())
            .finish()
    }
}
