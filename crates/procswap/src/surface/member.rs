//! Members of an exported surface.
//!
//! A surface is a named collection of [`Member`]s. Each member is either a
//! plain data [`Value`], a [`Function`], or an [`Accessor`] (a getter/setter
//! pair). Accessors are always copied as pairs so that reading through a
//! stable surface runs the unit's getter instead of returning a frozen
//! snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Data value carried by surfaces.
pub type Value = serde_json::Value;

/// Named members of a surface, kept in key order.
pub type Members = BTreeMap<String, Member>;

/// Getter half of an [`Accessor`].
pub type Getter = Arc<dyn Fn() -> Value + Send + Sync>;

/// Setter half of an [`Accessor`].
pub type Setter = Arc<dyn Fn(Value) + Send + Sync>;

/// A callable exported by a unit.
///
/// Cloning a `Function` shares the underlying closure.
#[derive(Clone)]
pub struct Function(Arc<dyn Fn(&[Value]) -> Value + Send + Sync>);

impl Function {
    /// Wraps a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invokes the function.
    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }

    /// Returns `true` if both handles share the same closure.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Function(..)")
    }
}

/// A getter/setter pair.
///
/// Either half may be missing: a getter-only accessor is read-only, a
/// setter-only accessor reads as absent.
#[derive(Clone, Default)]
pub struct Accessor {
    get: Option<Getter>,
    set: Option<Setter>,
}

impl Accessor {
    /// Creates an accessor with neither half.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the getter.
    #[must_use]
    pub fn getter<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.get = Some(Arc::new(f));
        self
    }

    /// Sets the setter.
    #[must_use]
    pub fn setter<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.set = Some(Arc::new(f));
        self
    }

    /// Runs the getter, if there is one.
    pub fn read(&self) -> Option<Value> {
        self.get.as_ref().map(|get| get())
    }

    /// Runs the setter. Returns `false` if the accessor has no setter.
    pub fn write(&self, value: Value) -> bool {
        match &self.set {
            Some(set) => {
                set(value);
                true
            }
            None => false,
        }
    }

    /// Returns `true` if a getter is present.
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        self.get.is_some()
    }

    /// Returns `true` if a setter is present.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.set.is_some()
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("get", &self.get.is_some())
            .field("set", &self.set.is_some())
            .finish()
    }
}

/// One named entry of a surface.
#[derive(Clone, Debug)]
pub enum Member {
    /// Plain data.
    Value(Value),

    /// A function member.
    Function(Function),

    /// A getter/setter pair.
    Accessor(Accessor),
}

impl Member {
    /// Creates a data member.
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    /// Creates a function member from a closure.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self::Function(Function::new(f))
    }

    /// Reads the member as data.
    ///
    /// Data members are cloned, accessors run their getter, functions read as
    /// `None`.
    pub fn read(&self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value.clone()),
            Self::Accessor(accessor) => accessor.read(),
            Self::Function(_) => None,
        }
    }
}

impl From<Value> for Member {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Function> for Member {
    fn from(function: Function) -> Self {
        Self::Function(function)
    }
}

impl From<Accessor> for Member {
    fn from(accessor: Accessor) -> Self {
        Self::Accessor(accessor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_accessor_pair_reads_live_state() {
        let cell = Arc::new(Mutex::new(json!(1)));
        let read_cell = cell.clone();
        let write_cell = cell.clone();

        let accessor = Accessor::new()
            .getter(move || read_cell.lock().clone())
            .setter(move |v| *write_cell.lock() = v);

        assert_eq!(accessor.read(), Some(json!(1)));
        assert!(accessor.write(json!(7)));
        assert_eq!(accessor.read(), Some(json!(7)));
        assert_eq!(*cell.lock(), json!(7));
    }

    #[test]
    fn test_getter_only_accessor_is_read_only() {
        let accessor = Accessor::new().getter(|| json!("fixed"));
        assert!(accessor.is_readable());
        assert!(!accessor.is_writable());
        assert!(!accessor.write(json!("other")));
    }

    #[test]
    fn test_member_read() {
        assert_eq!(Member::value(3).read(), Some(json!(3)));
        assert_eq!(Member::function(|_| json!(null)).read(), None);
    }

    #[test]
    fn test_function_identity() {
        let f = Function::new(|args| args.first().cloned().unwrap_or_default());
        let g = f.clone();
        assert!(f.ptr_eq(&g));
        assert_eq!(g.call(&[json!("x")]), json!("x"));
    }
}
