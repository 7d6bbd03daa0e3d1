//! Compiled units and their freshly produced exports.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::SurfaceKind;
use super::member::{Accessor, Function, Member, Members, Value};

/// Error returned by a migration hook.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct MigrationError {
    message: String,
}

impl MigrationError {
    /// Creates a migration error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Hook run after a reload, with the previous and the new module.
///
/// Lets a reloaded unit move internal state across versions (re-attach
/// listeners, carry caches over). A failing hook rolls the reload back.
pub type MigrationHook =
    Arc<dyn Fn(&Module, &Module) -> Result<(), MigrationError> + Send + Sync>;

/// The surface a compile produced, before it is copied into a stable handle.
#[derive(Clone, Debug)]
pub enum Exports {
    /// A plain collection of members.
    Object(Members),

    /// A function that also carries members.
    Callable {
        /// The function itself.
        function: Function,

        /// Members attached to the function.
        members: Members,
    },
}

impl Exports {
    /// Creates an empty object surface.
    #[must_use]
    pub fn object() -> Self {
        Self::Object(Members::new())
    }

    /// Creates a callable surface without members.
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self::Callable {
            function: Function::new(f),
            members: Members::new(),
        }
    }

    /// Adds a member, replacing any previous member with the same name.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, member: impl Into<Member>) -> Self {
        self.members_mut().insert(name.into(), member.into());
        self
    }

    /// Adds a data member.
    #[must_use]
    pub fn with_value(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(name, Member::Value(value.into()))
    }

    /// Adds a function member.
    #[must_use]
    pub fn with_function<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.with(name, Member::function(f))
    }

    /// Adds an accessor member.
    #[must_use]
    pub fn with_accessor(self, name: impl Into<String>, accessor: Accessor) -> Self {
        self.with(name, Member::Accessor(accessor))
    }

    /// Returns the kind of this surface.
    #[must_use]
    pub const fn kind(&self) -> SurfaceKind {
        match self {
            Self::Object(_) => SurfaceKind::Object,
            Self::Callable { .. } => SurfaceKind::Callable,
        }
    }

    /// Returns the members.
    #[must_use]
    pub const fn members(&self) -> &Members {
        match self {
            Self::Object(members) | Self::Callable { members, .. } => members,
        }
    }

    /// Returns the function of a callable surface.
    #[must_use]
    pub const fn function(&self) -> Option<&Function> {
        match self {
            Self::Object(_) => None,
            Self::Callable { function, .. } => Some(function),
        }
    }

    fn members_mut(&mut self) -> &mut Members {
        match self {
            Self::Object(members) | Self::Callable { members, .. } => members,
        }
    }
}

impl From<serde_json::Map<String, Value>> for Exports {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self::Object(
            map.into_iter()
                .map(|(name, value)| (name, Member::Value(value)))
                .collect(),
        )
    }
}

/// A compiled unit.
///
/// Besides its exports, a module carries two opt-in signals read by the apply
/// pipeline: the `managed` marker and an optional migration hook. A module
/// with neither is loaded once and never tracked unless the load was started
/// by the engine itself.
#[derive(Clone)]
pub struct Module {
    exports: Exports,
    migration: Option<MigrationHook>,
    managed: bool,
}

impl Module {
    /// Creates an unmanaged module without a migration hook.
    #[must_use]
    pub const fn new(exports: Exports) -> Self {
        Self {
            exports,
            migration: None,
            managed: false,
        }
    }

    /// Marks the module as asking to be hot-swap managed.
    #[must_use]
    pub const fn managed(mut self) -> Self {
        self.managed = true;
        self
    }

    /// Attaches a migration hook.
    #[must_use]
    pub fn with_migration<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Module, &Module) -> Result<(), MigrationError> + Send + Sync + 'static,
    {
        self.migration = Some(Arc::new(hook));
        self
    }

    /// Returns the exports.
    #[must_use]
    pub const fn exports(&self) -> &Exports {
        &self.exports
    }

    /// Returns the migration hook, if any.
    #[must_use]
    pub const fn migration(&self) -> Option<&MigrationHook> {
        self.migration.as_ref()
    }

    /// Returns `true` if the module carries the managed marker.
    #[must_use]
    pub const fn is_managed(&self) -> bool {
        self.managed
    }

    /// Returns `true` if the module asked to be tracked, either through the
    /// managed marker or by carrying a migration hook.
    #[must_use]
    pub const fn wants_tracking(&self) -> bool {
        self.managed || self.migration.is_some()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("exports", &self.exports)
            .field("migration", &self.migration.is_some())
            .field("managed", &self.managed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exports_kind() {
        assert_eq!(Exports::object().kind(), SurfaceKind::Object);
        assert_eq!(
            Exports::callable(|_| json!(null)).kind(),
            SurfaceKind::Callable
        );
    }

    #[test]
    fn test_exports_builder_replaces_members() {
        let exports = Exports::object()
            .with_value("a", 1)
            .with_value("a", 2)
            .with_function("f", |_| json!(true));
        assert_eq!(exports.members().len(), 2);
        assert_eq!(exports.members()["a"].read(), Some(json!(2)));
    }

    #[test]
    fn test_exports_from_json_map() {
        let Value::Object(map) = json!({"a": 1, "b": "two"}) else {
            unreachable!()
        };
        let exports = Exports::from(map);
        assert_eq!(exports.kind(), SurfaceKind::Object);
        assert_eq!(exports.members()["b"].read(), Some(json!("two")));
    }

    #[test]
    fn test_module_tracking_signals() {
        let plain = Module::new(Exports::object());
        assert!(!plain.wants_tracking());

        let managed = Module::new(Exports::object()).managed();
        assert!(managed.wants_tracking());

        let hooked = Module::new(Exports::object()).with_migration(|_, _| Ok(()));
        assert!(hooked.wants_tracking());
        assert!(!hooked.is_managed());
    }
}
