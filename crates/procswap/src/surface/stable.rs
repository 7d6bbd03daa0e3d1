//! The stable, identity-preserving surface handle.
//!
//! A [`Surface`] is what callers hold on to. Its identity is fixed for the
//! lifetime of the unit; reloads replace the contents behind it. Contents live
//! in an `Arc` slot behind a [`parking_lot::RwLock`] so that a reload is one
//! pointer swap: readers see either the old or the new contents, never a
//! half-copied surface.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::member::{Function, Member, Members, Value};
use super::module::Exports;
use super::{SurfaceError, SurfaceKind};

/// Snapshot of a surface's contents.
///
/// Returned by [`Surface::replace`] so a failed migration can roll back.
#[derive(Debug)]
pub struct SurfaceState {
    target: Option<Function>,
    members: Members,
}

impl SurfaceState {
    fn from_exports(exports: Exports) -> Self {
        match exports {
            Exports::Object(members) => Self {
                target: None,
                members,
            },
            Exports::Callable { function, members } => Self {
                target: Some(function),
                members,
            },
        }
    }

    /// Returns the members of this snapshot.
    #[must_use]
    pub const fn members(&self) -> &Members {
        &self.members
    }
}

struct SurfaceCell {
    kind: SurfaceKind,
    state: RwLock<Arc<SurfaceState>>,
    epoch: AtomicU64,
}

/// Stable handle to a unit's exported surface.
///
/// Cloning a `Surface` is cheap and yields the same identity: every clone
/// observes every reload. Closures stored in the surface are never called
/// while its lock is held, so a member may freely read its own surface.
///
/// # Example
///
/// ```
/// use procswap::{Exports, Surface};
/// use serde_json::json;
///
/// let surface = Surface::from_exports(Exports::object().with_value("value", 1));
/// let held = surface.clone();
///
/// surface.replace(Exports::object().with_value("value", 2)).unwrap();
/// assert_eq!(held.get("value"), Some(json!(2)));
/// assert!(held.ptr_eq(&surface));
/// ```
#[derive(Clone)]
pub struct Surface {
    cell: Arc<SurfaceCell>,
}

impl Surface {
    /// Creates a surface holding `exports`. The kind is fixed from here on.
    #[must_use]
    pub fn from_exports(exports: Exports) -> Self {
        let kind = exports.kind();
        Self {
            cell: Arc::new(SurfaceCell {
                kind,
                state: RwLock::new(Arc::new(SurfaceState::from_exports(exports))),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the kind recorded when the surface was created.
    #[must_use]
    pub fn kind(&self) -> SurfaceKind {
        self.cell.kind
    }

    /// Returns `true` if the surface can be called.
    #[must_use]
    pub fn is_callable(&self) -> bool {
        self.cell.kind == SurfaceKind::Callable
    }

    /// Returns an address that identifies this surface.
    #[must_use]
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.cell) as usize
    }

    /// Returns `true` if both handles refer to the same surface.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Returns how many times the contents were replaced.
    pub fn epoch(&self) -> u64 {
        self.cell.epoch.load(Ordering::Acquire)
    }

    /// Returns the current contents.
    pub fn snapshot(&self) -> Arc<SurfaceState> {
        self.cell.state.read().clone()
    }

    /// Returns a clone of the named member.
    pub fn member(&self, name: &str) -> Option<Member> {
        self.cell.state.read().members.get(name).cloned()
    }

    /// Reads a member as data.
    ///
    /// Accessor members run their getter; function members read as `None`.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.member(name)?.read()
    }

    /// Writes a member.
    ///
    /// Accessor members run their setter and fail if there is none. Data
    /// members are overwritten, and absent names are added, in the current
    /// contents only: the next reload replaces them.
    pub fn set(&self, name: &str, value: Value) -> Result<(), SurfaceError> {
        if let Some(Member::Accessor(accessor)) = self.member(name) {
            return if accessor.write(value) {
                Ok(())
            } else {
                Err(SurfaceError::ReadOnly {
                    name: name.to_string(),
                })
            };
        }

        let mut slot = self.cell.state.write();
        let mut members = slot.members.clone();
        members.insert(name.to_string(), Member::Value(value));
        *slot = Arc::new(SurfaceState {
            target: slot.target.clone(),
            members,
        });
        Ok(())
    }

    /// Calls a callable surface.
    ///
    /// Always forwards to the function of the current contents.
    pub fn call(&self, args: &[Value]) -> Result<Value, SurfaceError> {
        let target = self.cell.state.read().target.clone();
        target
            .map(|function| function.call(args))
            .ok_or(SurfaceError::NotCallable)
    }

    /// Calls a function member.
    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Value, SurfaceError> {
        match self.member(name) {
            Some(Member::Function(function)) => Ok(function.call(args)),
            _ => Err(SurfaceError::NotAFunction {
                name: name.to_string(),
            }),
        }
    }

    /// Returns the member names in order.
    pub fn keys(&self) -> Vec<String> {
        self.cell.state.read().members.keys().cloned().collect()
    }

    /// Returns `true` if a member with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.cell.state.read().members.contains_key(name)
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.cell.state.read().members.len()
    }

    /// Returns `true` if the surface has no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads every readable member into a JSON object.
    ///
    /// Functions and getter-less accessors are skipped.
    pub fn to_value(&self) -> Value {
        let state = self.snapshot();
        let map = state
            .members
            .iter()
            .filter_map(|(name, member)| member.read().map(|value| (name.clone(), value)))
            .collect::<serde_json::Map<_, _>>();
        Value::Object(map)
    }

    /// Atomically replaces the contents with `exports`.
    ///
    /// Nothing of the previous members survives. Returns the previous
    /// contents, or an error without touching the surface if the kind
    /// differs.
    pub fn replace(&self, exports: Exports) -> Result<Arc<SurfaceState>, SurfaceError> {
        let found = exports.kind();
        if found != self.cell.kind {
            return Err(SurfaceError::KindMismatch {
                expected: self.cell.kind,
                found,
            });
        }

        let fresh = Arc::new(SurfaceState::from_exports(exports));
        let previous = std::mem::replace(&mut *self.cell.state.write(), fresh);
        self.cell.epoch.fetch_add(1, Ordering::Release);
        Ok(previous)
    }

    /// Puts previously captured contents back.
    pub fn restore(&self, state: Arc<SurfaceState>) {
        *self.cell.state.write() = state;
        self.cell.epoch.fetch_add(1, Ordering::Release);
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("id", &format_args!("{:#x}", self.id()))
            .field("kind", &self.cell.kind)
            .field("epoch", &self.epoch())
            .field("keys", &self.keys())
            .finish()
    }
}
