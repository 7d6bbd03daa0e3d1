//! Data units: JSON and TOML files compiled into object surfaces.
//!
//! # Supported Formats
//!
//! | Format | Feature | Extensions |
//! |--------|---------|------------|
//! | JSON | always | `.json` |
//! | TOML | `toml` (default) | `.toml` |
//!
//! Files whose extension is not recognised are parsed with the compiler's
//! default format, so a `.hot` unit can hold JSON or TOML.

use std::path::Path;

use super::compiler::{CompileError, Compiler};
use crate::surface::{Exports, Module, Value};

/// Source format of a data unit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataFormat {
    /// JSON (`.json`).
    Json,

    /// TOML (`.toml`).
    #[cfg(feature = "toml")]
    Toml,
}

impl DataFormat {
    /// Detects the format from the file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;

        match ext.to_lowercase().as_str() {
            "json" => Some(Self::Json),

            #[cfg(feature = "toml")]
            "toml" => Some(Self::Toml),

            _ => None,
        }
    }

    /// Format name for error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Json => "JSON",

            #[cfg(feature = "toml")]
            Self::Toml => "TOML",
        }
    }

    /// Parses `content` into a JSON value.
    pub fn parse(&self, content: &str) -> Result<Value, CompileError> {
        match self {
            Self::Json => serde_json::from_str(content).map_err(|e| {
                let message = e.to_string();
                let message = message.split(" at line ").next().unwrap_or(&message);
                CompileError::new(format!("JSON parse error: {message}")).at(e.line(), e.column())
            }),

            #[cfg(feature = "toml")]
            Self::Toml => {
                let value: toml::Value = toml::from_str(content).map_err(|e| {
                    let err = CompileError::new(format!("TOML parse error: {}", e.message()));
                    match e.span() {
                        Some(span) => {
                            let (line, col) = offset_to_line_col(content, span.start);
                            err.at(line, col)
                        }
                        None => err,
                    }
                })?;
                Ok(toml_to_json(value))
            }
        }
    }
}

/// Compiles JSON and TOML units.
///
/// The top level of a data unit must be an object; its keys become the
/// members of the surface. Modules are marked managed unless disabled with
/// [`DataCompiler::managed`].
#[derive(Clone, Debug)]
pub struct DataCompiler {
    default_format: DataFormat,
    managed: bool,
}

impl DataCompiler {
    /// Creates a compiler with JSON as the default format.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            default_format: DataFormat::Json,
            managed: true,
        }
    }

    /// Sets the format used for unrecognised extensions.
    #[must_use]
    pub const fn default_format(mut self, format: DataFormat) -> Self {
        self.default_format = format;
        self
    }

    /// Sets whether compiled modules ask to be tracked.
    #[must_use]
    pub const fn managed(mut self, managed: bool) -> Self {
        self.managed = managed;
        self
    }

    /// Returns the format used for `path`.
    #[must_use]
    pub fn format_for(&self, path: &Path) -> DataFormat {
        DataFormat::from_path(path).unwrap_or(self.default_format)
    }
}

impl Default for DataCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler for DataCompiler {
    fn compile(&self, path: &Path, source: &str) -> Result<Module, CompileError> {
        let format = self.format_for(path);
        let Value::Object(map) = format.parse(source)? else {
            return Err(CompileError::new(format!(
                "top level of a {} unit must be an object",
                format.name()
            )));
        };

        let module = Module::new(Exports::from(map));
        Ok(if self.managed { module.managed() } else { module })
    }
}

/// Converts a TOML value to a JSON value.
#[cfg(feature = "toml")]
pub(crate) fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),

        toml::Value::Integer(i) => Value::Number(i.into()),

        toml::Value::Float(f) => {
            Value::Number(serde_json::Number::from_f64(f).unwrap_or_else(|| 0.into()))
        }

        toml::Value::Boolean(b) => Value::Bool(b),

        toml::Value::Datetime(dt) => Value::String(dt.to_string()),

        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),

        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Converts a byte offset to a 1-indexed line and column.
pub(crate) fn offset_to_line_col(content: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(content.len());
    let before = content.get(..offset).unwrap_or(content);
    let line = before.matches('\n').count() + 1;
    let col = before.rfind('\n').map_or(before.len(), |nl| before.len() - nl - 1) + 1;
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_detection() {
        assert_eq!(
            DataFormat::from_path(Path::new("a.json")),
            Some(DataFormat::Json)
        );
        assert_eq!(
            DataFormat::from_path(Path::new("a.JSON")),
            Some(DataFormat::Json)
        );
        assert_eq!(DataFormat::from_path(Path::new("a.hot")), None);
    }

    #[test]
    fn test_compile_json_object() {
        let module = DataCompiler::new()
            .compile(Path::new("/u.json"), r#"{"value": 1, "name": "x"}"#)
            .unwrap();
        assert!(module.is_managed());
        assert_eq!(module.exports().members()["value"].read(), Some(json!(1)));
    }

    #[test]
    fn test_unknown_extension_uses_default_format() {
        let module = DataCompiler::new()
            .compile(Path::new("/u.hot"), r#"{"value": 2}"#)
            .unwrap();
        assert_eq!(module.exports().members()["value"].read(), Some(json!(2)));
    }

    #[test]
    fn test_rejects_non_object_top_level() {
        let err = DataCompiler::new()
            .compile(Path::new("/u.json"), "[1, 2]")
            .unwrap_err();
        assert!(err.message().contains("must be an object"));
    }

    #[test]
    fn test_json_error_has_location() {
        let err = DataCompiler::new()
            .compile(Path::new("/u.json"), "{\n  \"a\": ,\n}")
            .unwrap_err();
        assert_eq!(err.location().map(|(line, _)| line), Some(2));
    }

    #[test]
    fn test_unmanaged_compiler() {
        let module = DataCompiler::new()
            .managed(false)
            .compile(Path::new("/u.json"), "{}")
            .unwrap();
        assert!(!module.wants_tracking());
    }

    #[test]
    fn test_offset_to_line_col() {
        let content = "ab\ncd\nef";
        assert_eq!(offset_to_line_col(content, 0), (1, 1));
        assert_eq!(offset_to_line_col(content, 4), (2, 2));
        assert_eq!(offset_to_line_col(content, 6), (3, 1));
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_compile_toml_table() {
        let module = DataCompiler::new()
            .compile(
                Path::new("/u.toml"),
                "value = 3\nratio = 0.5\n[nested]\nkey = \"v\"\n",
            )
            .unwrap();
        let members = module.exports().members();
        assert_eq!(members["value"].read(), Some(json!(3)));
        assert_eq!(members["nested"].read(), Some(json!({"key": "v"})));
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_toml_error_has_location() {
        let err = DataCompiler::new()
            .compile(Path::new("/u.toml"), "a = 1\nb = \n")
            .unwrap_err();
        assert!(err.message().starts_with("TOML parse error"));
        assert!(matches!(err.location(), Some((line, _)) if line >= 2));
    }
}
