//! Error types for the reload engine.
//!
//! This module contains the [`HotswapError`] enum, the single error type that
//! flows through the engine's event channel, with rich diagnostics via
//! [`miette`].
//!
//! # Error Variants
//!
//! | Variant | When It Occurs |
//! |---------|----------------|
//! | [`HotswapError::Io`] | A read exhausted every retry of the schedule |
//! | [`HotswapError::Compile`] | The compile primitive rejected a unit |
//! | [`HotswapError::IncompatibleShape`] | A reload changed the unit's export kind |
//! | [`HotswapError::Usage`] | A relative request was passed to `force_require` |
//! | [`HotswapError::Migration`] | A unit's migration hook failed |
//! | [`HotswapError::NotFound`] | A request could not be resolved to a file |
//! | [`HotswapError::Watch`] | A filesystem watch could not be armed |
//! | [`HotswapError::Init`] | The engine could not be started |
//!
//! # Propagation
//!
//! None of these errors is fatal to the process. Every one of them is
//! reported on the engine's event channel as [`HotswapEvent::Error`]; the
//! explicit facade calls (`force_require`, `require`, `build`) additionally
//! return them. A failed reload always leaves the previous version of the unit
//! active.
//!
//! The type is `Clone` so the same error can be both emitted and returned.
//! I/O sources are shared through an [`Arc`] for that reason.
//!
//! [`HotswapEvent::Error`]: crate::HotswapEvent::Error

use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::surface::SurfaceKind;

/// Errors reported by the reload engine.
///
/// # Diagnostic Codes
///
/// | Code | Meaning |
/// |------|---------|
/// | `procswap::io` | Read retries exhausted |
/// | `procswap::compile` | Unit failed to compile |
/// | `procswap::incompatible_shape` | Export kind changed across a reload |
/// | `procswap::usage` | API misuse (relative request) |
/// | `procswap::migration` | Migration hook failed, reload rolled back |
/// | `procswap::not_found` | Request could not be resolved |
/// | `procswap::watch` | Watch could not be armed |
/// | `procswap::init` | Engine start-up failed |
#[derive(Debug, Clone, Error, Diagnostic)]
#[non_exhaustive]
pub enum HotswapError {
    /// Reading a unit failed on every attempt of the retry schedule.
    #[error("failed to read '{}' after {attempts} attempt(s)", .path.display())]
    #[diagnostic(
        code(procswap::io),
        help("the previous version of the unit stays active; save the file again to retry")
    )]
    Io {
        /// The unit that could not be read.
        path: PathBuf,

        /// How many reads were attempted.
        attempts: usize,

        /// The error of the last attempt.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The compile primitive rejected the unit's content.
    #[error("failed to compile '{}': {message}", .path.display())]
    #[diagnostic(
        code(procswap::compile),
        help("fix the unit and save it again; the previous version stays active")
    )]
    Compile {
        /// The unit that failed to compile.
        path: PathBuf,

        /// Message produced by the compiler.
        message: String,
    },

    /// A reload produced a surface of a different kind than the tracked one.
    ///
    /// The stable surface is not touched when this happens.
    #[error(
        "exported surface of '{}' changed from {expected} to {found}",
        .path.display()
    )]
    #[diagnostic(
        code(procswap::incompatible_shape),
        help("a change of export kind cannot be applied in place; restart the process to pick it up")
    )]
    IncompatibleShape {
        /// The unit whose reload was rejected.
        path: PathBuf,

        /// Kind recorded on first load.
        expected: SurfaceKind,

        /// Kind produced by the rejected reload.
        found: SurfaceKind,
    },

    /// The engine was called with an argument it cannot act on.
    #[error("cannot load '{request}': {message}")]
    #[diagnostic(
        code(procswap::usage),
        help("pass an absolute path or a package name")
    )]
    Usage {
        /// The offending request.
        request: String,

        /// Why the request was refused.
        message: String,
    },

    /// The migration hook of a reloaded unit failed.
    ///
    /// The stable surface is rolled back to the contents it had before the
    /// reload.
    #[error("migration hook of '{}' failed: {message}", .path.display())]
    #[diagnostic(
        code(procswap::migration),
        help("the previous version of the unit was restored")
    )]
    Migration {
        /// The unit whose migration failed.
        path: PathBuf,

        /// Message produced by the hook.
        message: String,
    },

    /// A request could not be resolved to a file.
    #[error("cannot resolve '{request}'")]
    #[diagnostic(
        code(procswap::not_found),
        help("check the path, or register a search path on the module loader")
    )]
    NotFound {
        /// The request that failed to resolve.
        request: String,

        /// Candidate files that were tried.
        searched: Vec<PathBuf>,
    },

    /// A filesystem watch could not be armed.
    #[error("failed to watch '{}': {message}", .path.display())]
    #[diagnostic(
        code(procswap::watch),
        help("ensure the path exists and you have read permissions")
    )]
    Watch {
        /// The path that could not be watched.
        path: PathBuf,

        /// Human-readable error message.
        message: String,
    },

    /// The engine could not be started.
    #[error("failed to initialize reload engine: {message}")]
    #[diagnostic(code(procswap::init))]
    Init {
        /// Human-readable error message.
        message: String,
    },
}

impl HotswapError {
    /// Creates an `Io` error.
    pub fn io(path: impl Into<PathBuf>, attempts: usize, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            attempts,
            source: Arc::new(source),
        }
    }

    /// Creates a `Compile` error.
    pub fn compile(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Compile {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an `IncompatibleShape` error.
    pub fn incompatible_shape(
        path: impl Into<PathBuf>,
        expected: SurfaceKind,
        found: SurfaceKind,
    ) -> Self {
        Self::IncompatibleShape {
            path: path.into(),
            expected,
            found,
        }
    }

    /// Creates a `Usage` error.
    pub fn usage(request: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Usage {
            request: request.into(),
            message: message.into(),
        }
    }

    /// Creates a `Migration` error.
    pub fn migration(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Migration {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(request: impl Into<String>, searched: Vec<PathBuf>) -> Self {
        Self::NotFound {
            request: request.into(),
            searched,
        }
    }

    /// Creates a `Watch` error.
    pub fn watch(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Watch {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an `Init` error.
    pub fn init(message: impl Into<String>) -> Self {
        Self::Init {
            message: message.into(),
        }
    }

    /// Returns the unit path this error is about, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Io { path, .. }
            | Self::Compile { path, .. }
            | Self::IncompatibleShape { path, .. }
            | Self::Migration { path, .. }
            | Self::Watch { path, .. } => Some(path),

            Self::Usage { .. } | Self::NotFound { .. } | Self::Init { .. } => None,
        }
    }

    /// Returns `true` for read-exhaustion errors.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Returns `true` for shape-mismatch rejections.
    #[must_use]
    pub const fn is_incompatible_shape(&self) -> bool {
        matches!(self, Self::IncompatibleShape { .. })
    }

    /// Returns `true` for usage errors.
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self, Self::Usage { .. })
    }
}
