//! Interception of the host loader's handler table.
//!
//! [`ExtensionHooks`] installs the engine's routing handler for a set of
//! tags, remembering whatever handler was installed before so that releasing
//! a tag restores the loader exactly as it was.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::loader::{LoadHandler, ModuleLoader};

/// Normalises a tag to carry a leading dot.
///
/// ```
/// assert_eq!(procswap::normalize_tag("hot"), ".hot");
/// assert_eq!(procswap::normalize_tag(".hot"), ".hot");
/// ```
#[must_use]
pub fn normalize_tag(tag: &str) -> String {
    let tag = tag.trim();
    if tag.starts_with('.') {
        tag.to_string()
    } else {
        format!(".{tag}")
    }
}

struct Registration {
    original: Option<Arc<dyn LoadHandler>>,
}

/// The set of tags currently routed through the engine.
pub struct ExtensionHooks {
    loader: Arc<ModuleLoader>,
    handler: Arc<dyn LoadHandler>,
    registrations: Mutex<BTreeMap<String, Registration>>,
}

impl ExtensionHooks {
    /// Creates an empty hook set that installs `handler` on interception.
    pub fn new(loader: Arc<ModuleLoader>, handler: Arc<dyn LoadHandler>) -> Self {
        Self {
            loader,
            handler,
            registrations: Mutex::new(BTreeMap::new()),
        }
    }

    /// Routes `tag` through the engine. Returns `false` if it already was.
    pub fn intercept(&self, tag: &str) -> bool {
        let tag = normalize_tag(tag);
        let mut registrations = self.registrations.lock();
        if registrations.contains_key(&tag) {
            return false;
        }

        let original = self.loader.install(tag.clone(), self.handler.clone());
        debug!(tag = %tag, had_original = original.is_some(), "intercepted tag");
        registrations.insert(tag, Registration { original });
        true
    }

    /// Restores the handler `tag` had before it was intercepted, or removes
    /// the hook if there was none. Returns `false` if `tag` was not hooked.
    pub fn release(&self, tag: &str) -> bool {
        let tag = normalize_tag(tag);
        let Some(registration) = self.registrations.lock().remove(&tag) else {
            return false;
        };

        match registration.original {
            Some(original) => {
                self.loader.install(tag.clone(), original);
                debug!(tag = %tag, "restored original handler");
            }
            None => {
                self.loader.remove(&tag);
                debug!(tag = %tag, "removed hook");
            }
        }
        true
    }

    /// Returns `true` if `tag` is routed through the engine.
    pub fn is_hooked(&self, tag: &str) -> bool {
        self.registrations.lock().contains_key(&normalize_tag(tag))
    }

    /// Returns the hooked tags.
    pub fn tags(&self) -> BTreeSet<String> {
        self.registrations.lock().keys().cloned().collect()
    }

    /// Makes the hooked set equal to `tags`, touching only the difference.
    ///
    /// Returns the resulting set.
    pub fn set_tags<I, S>(&self, tags: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: BTreeSet<String> = tags
            .into_iter()
            .map(|tag| normalize_tag(tag.as_ref()))
            .filter(|tag| tag.len() > 1)
            .collect();

        for tag in self.tags().difference(&wanted) {
            self.release(tag);
        }
        for tag in &wanted {
            self.intercept(tag);
        }

        self.tags()
    }

    /// Releases every hooked tag.
    pub fn release_all(&self) {
        for tag in self.tags() {
            self.release(&tag);
        }
    }

    /// Hooks `tag` until the returned guard is dropped.
    ///
    /// If `tag` is already hooked the guard does nothing.
    pub fn temporary(&self, tag: &str) -> TemporaryHook<'_> {
        let installed = self.intercept(tag);
        TemporaryHook {
            hooks: self,
            tag: normalize_tag(tag),
            installed,
        }
    }
}

impl std::fmt::Debug for ExtensionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionHooks")
            .field("tags", &self.tags())
            .finish()
    }
}

/// Guard returned by [`ExtensionHooks::temporary`].
///
/// Releases the tag on drop, including during unwinding.
#[must_use = "the hook is released as soon as the guard is dropped"]
pub struct TemporaryHook<'a> {
    hooks: &'a ExtensionHooks,
    tag: String,
    installed: bool,
}

impl TemporaryHook<'_> {
    /// Returns `true` if this guard installed the hook.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

impl Drop for TemporaryHook<'_> {
    fn drop(&mut self) {
        if self.installed {
            self.hooks.release(&self.tag);
        }
    }
}
