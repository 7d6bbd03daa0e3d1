//! Exported surfaces and compiled modules.
//!
//! # Overview
//!
//! A compile turns a unit's source into a [`Module`], whose [`Exports`] are
//! the freshly produced surface. The engine never hands `Exports` to callers
//! directly: on first load it copies them into a [`Surface`], the stable
//! handle, and on every later reload it copies the new exports into that same
//! handle. Code holding a `Surface` therefore observes every reload without
//! re-requesting the unit.
//!
//! # Kinds
//!
//! Exports are either a plain object or a callable carrying members
//! ([`SurfaceKind`]). The kind is fixed when the surface is created; a reload
//! producing the other kind is rejected and leaves the surface untouched.

mod member;
mod module;
mod stable;

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

pub use member::{Accessor, Function, Getter, Member, Members, Setter, Value};
pub use module::{Exports, MigrationError, MigrationHook, Module};
pub use stable::{Surface, SurfaceState};

/// The shape of an exported surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// A collection of members.
    Object,

    /// A function that also carries members.
    Callable,
}

impl fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object => f.write_str("object"),
            Self::Callable => f.write_str("callable"),
        }
    }
}

/// Errors from operating on a [`Surface`].
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum SurfaceError {
    /// The surface is an object and cannot be called.
    #[error("surface is not callable")]
    #[diagnostic(code(procswap::surface::not_callable))]
    NotCallable,

    /// The named member is missing or is not a function.
    #[error("member '{name}' is not a function")]
    #[diagnostic(code(procswap::surface::not_a_function))]
    NotAFunction {
        /// The member that was invoked.
        name: String,
    },

    /// The named member is an accessor without a setter.
    #[error("member '{name}' is read-only")]
    #[diagnostic(code(procswap::surface::read_only))]
    ReadOnly {
        /// The member that was written.
        name: String,
    },

    /// New contents of a different kind were offered.
    #[error("cannot replace a {expected} surface with a {found} one")]
    #[diagnostic(code(procswap::surface::kind_mismatch))]
    KindMismatch {
        /// Kind of the surface.
        expected: SurfaceKind,

        /// Kind of the offered contents.
        found: SurfaceKind,
    },
}
