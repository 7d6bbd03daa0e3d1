//! # procswap
//!
//! Identity-preserving hot reload for long-running processes.
//!
//! `procswap` replaces the implementation behind already-loaded units without
//! restarting the process. Every holder of a unit's [`Surface`] observes the
//! new contents on its next access; nobody has to re-request the unit.
//!
//! ## What It Does
//!
//! - **Intercepts the loader** - Units with a hooked tag (`.hot` by default)
//!   are routed through the engine before they reach the loader cache
//! - **Reads resiliently** - Changed files are read with bounded retries
//!   (100ms, 300ms, 1000ms), riding out editors that are still writing
//! - **Preserves identity** - Reloads are copied into the existing surface in
//!   one atomic swap; a change of export kind is reported, never applied
//! - **Watches and reconciles** - Tracked units are watched with [`notify`],
//!   and [`Hotswap::reconcile_now`] catches up on every change at once
//! - **Reports everything** - Failures never take the process down; they are
//!   published as [`HotswapEvent::Error`] with [`miette`] diagnostics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use procswap::{DataCompiler, Hotswap, HotswapEvent};
//!
//! fn main() -> procswap::Result<()> {
//!     let hotswap = Hotswap::builder()
//!         .compiler(DataCompiler::new())
//!         .build()?;
//!
//!     let events = hotswap.subscribe();
//!     let settings = hotswap.require("/srv/app/settings.hot")?;
//!
//!     for event in events {
//!         if let HotswapEvent::Swap(path) = event {
//!             println!("{} reloaded: limit = {:?}", path.display(), settings.get("limit"));
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Units and Surfaces
//!
//! A unit compiles to a [`Module`]: its [`Exports`] (an object of members or
//! a callable with members), an opt-in tracking marker and an optional
//! migration hook. Only tracked units are hot-swapped. The first load creates
//! the stable [`Surface`]; later loads copy into it:
//!
//! | Reload produces | Result |
//! |-----------------|--------|
//! | same kind | members swapped in place, [`HotswapEvent::Swap`] emitted |
//! | different kind | [`HotswapError::IncompatibleShape`], surface untouched |
//! | compile error | [`HotswapError::Compile`], surface untouched |
//! | failing migration hook | [`HotswapError::Migration`], surface rolled back |
//!
//! ## Configuration
//!
//! [`HotswapConfig`] can be built in code, read from a TOML or JSON file, or
//! overlaid from `PROCSWAP_*` environment variables. Runtime changes go through
//! [`Hotswap::configure`], which applies only the keys of a [`ConfigUpdate`].
//!
//! ## Feature Flags
//!
//! | Feature | Description | Default |
//! |---------|-------------|---------|
//! | `toml` | TOML data units and TOML configuration files | **Yes** |

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Re-export miette for error handling.
pub use miette;

/// Re-export `serde_json`, whose `Value` is the data type of surface members.
pub use serde_json;

// ============================================================================
// Core Modules
// ============================================================================

mod error;
pub use error::HotswapError;

/// A Result type that displays errors with miette's fancy formatting.
///
/// ```rust,ignore
/// fn main() -> procswap::Result<()> {
///     let hotswap = Hotswap::builder().compiler(DataCompiler::new()).build()?;
///     Ok(())
/// }
/// ```
pub type Result<T> = miette::Result<T>;

pub mod surface;
pub use surface::{
    Accessor, Exports, Function, Member, Members, MigrationError, MigrationHook, Module, Surface,
    SurfaceError, SurfaceKind, Value,
};

mod event;
pub use event::{ChangeCallback, ErrorCallback, EventBus, HotswapEvent, SwapCallback};

// ============================================================================
// Loading
// ============================================================================

pub mod loader;
pub use loader::{CompileError, Compiler, DataCompiler, DataFormat, LoadHandler, ModuleLoader};

mod hook;
pub use hook::{ExtensionHooks, TemporaryHook, normalize_tag};

pub mod source;
pub use source::{BoxFuture, ResilientReader, RetrySchedule, SourceFs, TokioFs, WatchGate};

mod registry;
pub use registry::{TrackedUnit, UnitRegistry};

// ============================================================================
// Engine
// ============================================================================

pub mod config;
pub use config::{ConfigError, ConfigUpdate, HotswapConfig};

pub mod watch;
pub use watch::WatchFeed;

mod engine;
pub use engine::{ApplyOutcome, Hotswap, HotswapBuilder};
