//! The host module loader.
//!
//! [`ModuleLoader`] resolves requests to files, dispatches each load to the
//! [`LoadHandler`] installed for the file's tag, and caches the resulting
//! surfaces by path. Loads for tags without a handler are compiled and
//! returned as plain, untracked surfaces.
//!
//! The reload engine only ever talks to the loader through its handler table
//! ([`ModuleLoader::handler`], [`ModuleLoader::install`],
//! [`ModuleLoader::remove`]) and its cache.

mod compiler;
mod data;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::HotswapError;
use crate::source::{absolutize, strip_bom};
use crate::surface::{Module, Surface};

pub use compiler::{CompileError, Compiler};
pub use data::{DataCompiler, DataFormat};

#[cfg(feature = "toml")]
pub(crate) use data::toml_to_json;
pub(crate) use data::offset_to_line_col;

/// Handles loads for one tag.
///
/// Closures with the matching signature implement this trait.
pub trait LoadHandler: Send + Sync {
    /// Loads the unit at `path`.
    fn load(&self, loader: &ModuleLoader, path: &Path) -> Result<Surface, HotswapError>;
}

impl<F> LoadHandler for F
where
    F: Fn(&ModuleLoader, &Path) -> Result<Surface, HotswapError> + Send + Sync,
{
    fn load(&self, loader: &ModuleLoader, path: &Path) -> Result<Surface, HotswapError> {
        self(loader, path)
    }
}

/// Tag used for files without an extension.
pub const DEFAULT_TAG: &str = ".unit";

/// Resolves, compiles and caches units.
pub struct ModuleLoader {
    compiler: Arc<dyn Compiler>,
    handlers: RwLock<HashMap<String, Arc<dyn LoadHandler>>>,
    cache: RwLock<HashMap<PathBuf, Surface>>,
    search_paths: Vec<PathBuf>,
    default_tag: String,
}

impl ModuleLoader {
    /// Creates a loader using `compiler` for every unit.
    pub fn new(compiler: impl Compiler + 'static) -> Self {
        Self::with_compiler(Arc::new(compiler))
    }

    /// Creates a loader from a shared compiler.
    pub fn with_compiler(compiler: Arc<dyn Compiler>) -> Self {
        Self {
            compiler,
            handlers: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            search_paths: Vec::new(),
            default_tag: DEFAULT_TAG.to_string(),
        }
    }

    /// Adds a root searched when resolving package names.
    #[must_use]
    pub fn search_path(mut self, root: impl Into<PathBuf>) -> Self {
        self.search_paths.push(root.into());
        self
    }

    /// Sets the tag used for files without an extension.
    #[must_use]
    pub fn default_tag(mut self, tag: impl Into<String>) -> Self {
        self.default_tag = tag.into();
        self
    }

    /// Returns the tag selecting the handler for `path`.
    #[must_use]
    pub fn tag_of(&self, path: &Path) -> String {
        path.extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .map_or_else(|| self.default_tag.clone(), |ext| format!(".{ext}"))
    }

    /// Returns the handler installed for `tag`.
    pub fn handler(&self, tag: &str) -> Option<Arc<dyn LoadHandler>> {
        self.handlers.read().get(tag).cloned()
    }

    /// Installs a handler for `tag`, returning the one it replaced.
    pub fn install(
        &self,
        tag: impl Into<String>,
        handler: Arc<dyn LoadHandler>,
    ) -> Option<Arc<dyn LoadHandler>> {
        self.handlers.write().insert(tag.into(), handler)
    }

    /// Removes the handler for `tag`.
    pub fn remove(&self, tag: &str) -> Option<Arc<dyn LoadHandler>> {
        self.handlers.write().remove(tag)
    }

    /// Compiles `source` as the unit at `path`.
    pub fn compile(&self, path: &Path, source: &str) -> Result<Module, HotswapError> {
        self.compiler
            .compile(path, source)
            .map_err(|err| HotswapError::compile(path, err.to_string()))
    }

    /// Resolves a request to a file.
    ///
    /// Absolute paths and paths starting with `./` or `../` are taken as
    /// files. Anything else is a package name, looked up under each search
    /// root as-is and with every installed tag appended.
    pub fn resolve(&self, request: &str) -> Result<PathBuf, HotswapError> {
        let as_path = Path::new(request);
        if as_path.is_absolute() || is_relative_request(request) {
            let path = absolutize(as_path);
            return if path.is_file() {
                Ok(path)
            } else {
                Err(HotswapError::not_found(request, vec![path]))
            };
        }

        let mut tags: Vec<String> = self.handlers.read().keys().cloned().collect();
        tags.sort();

        let mut searched = Vec::new();
        for root in &self.search_paths {
            let base = absolutize(&root.join(request));
            let candidates = std::iter::once(base.clone()).chain(tags.iter().map(|tag| {
                let mut name = base.clone().into_os_string();
                name.push(tag);
                PathBuf::from(name)
            }));

            for candidate in candidates {
                if candidate.is_file() {
                    return Ok(candidate);
                }
                searched.push(candidate);
            }
        }

        Err(HotswapError::not_found(request, searched))
    }

    /// Loads a unit, returning the cached surface when there is one.
    pub fn require(&self, request: impl AsRef<Path>) -> Result<Surface, HotswapError> {
        let request = request.as_ref();
        let path = match request.to_str() {
            Some(s) => self.resolve(s)?,
            None => absolutize(request),
        };

        if let Some(surface) = self.cached(&path) {
            return Ok(surface);
        }

        self.load_resolved(path)
    }

    /// Dispatches a load of an already resolved path to its tag's handler
    /// and caches the result. The cache is not consulted.
    pub fn load_resolved(&self, path: PathBuf) -> Result<Surface, HotswapError> {
        let handler = self.handler(&self.tag_of(&path));
        let surface = match handler {
            Some(handler) => handler.load(self, &path)?,
            None => self.load_plain(&path)?,
        };

        self.insert_cached(path, surface.clone());
        Ok(surface)
    }

    /// Returns the cached surface for `path`.
    pub fn cached(&self, path: &Path) -> Option<Surface> {
        self.cache.read().get(path).cloned()
    }

    /// Removes `path` from the cache.
    pub fn evict(&self, path: &Path) -> Option<Surface> {
        self.cache.write().remove(path)
    }

    /// Caches `surface` for `path`.
    pub fn insert_cached(&self, path: PathBuf, surface: Surface) {
        self.cache.write().insert(path, surface);
    }

    /// Reads the source of `path` synchronously, without retries.
    pub fn read_source(&self, path: &Path) -> Result<String, HotswapError> {
        let content =
            std::fs::read_to_string(path).map_err(|err| HotswapError::io(path, 1, err))?;
        Ok(strip_bom(&content).to_string())
    }

    /// Reads and compiles `path` into a detached surface.
    pub fn load_plain(&self, path: &Path) -> Result<Surface, HotswapError> {
        debug!(path = %path.display(), "plain load");
        let source = self.read_source(path)?;
        let module = self.compile(path, &source)?;
        Ok(Surface::from_exports(module.exports().clone()))
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<String> = self.handlers.read().keys().cloned().collect();
        tags.sort();
        f.debug_struct("ModuleLoader")
            .field("handlers", &tags)
            .field("cached", &self.cache.read().len())
            .field("search_paths", &self.search_paths)
            .field("default_tag", &self.default_tag)
            .finish()
    }
}

/// Returns `true` for requests relative to the caller's location.
pub(crate) fn is_relative_request(request: &str) -> bool {
    ["./", "../", ".\\", "..\\"]
        .iter()
        .any(|prefix| request.starts_with(prefix))
}
