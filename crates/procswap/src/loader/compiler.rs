//! The compile primitive.

use std::fmt;
use std::path::Path;

use crate::surface::Module;

/// Error produced by a [`Compiler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    message: String,
    location: Option<(usize, usize)>,
}

impl CompileError {
    /// Creates an error without a source location.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    /// Attaches a 1-indexed line and column.
    #[must_use]
    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.location = Some((line, column));
        self
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the line and column, if known.
    #[must_use]
    pub const fn location(&self) -> Option<(usize, usize)> {
        self.location
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some((line, column)) => write!(f, "{} at line {line} column {column}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for CompileError {}

/// Turns unit source into a [`Module`].
///
/// Implementations must be pure with respect to the engine: they are called
/// with the engine's apply lock held and must not load other units through
/// the same engine.
///
/// Closures with the matching signature implement this trait.
pub trait Compiler: Send + Sync {
    /// Compiles the source of the unit at `path`.
    fn compile(&self, path: &Path, source: &str) -> Result<Module, CompileError>;
}

impl<F> Compiler for F
where
    F: Fn(&Path, &str) -> Result<Module, CompileError> + Send + Sync,
{
    fn compile(&self, path: &Path, source: &str) -> Result<Module, CompileError> {
        self(path, source)
    }
}
