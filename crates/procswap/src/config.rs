//! Engine configuration.
//!
//! [`HotswapConfig`] is assembled from three layers, later layers winning:
//!
//! 1. built-in defaults,
//! 2. a JSON or TOML file ([`HotswapConfig::from_file`]),
//! 3. environment variables ([`HotswapConfig::merge_env`]).
//!
//! # Environment Variables
//!
//! | Variable | Type | Example |
//! |----------|------|---------|
//! | `PROCSWAP_EXTENSIONS` | comma-separated tags | `.hot,.unit` |
//! | `PROCSWAP_WATCH` | bool | `true` |
//! | `PROCSWAP_AUTORELOAD` | bool | `off` |
//! | `PROCSWAP_RETRY_DELAYS_MS` | comma-separated integers | `100,300,1000` |
//! | `PROCSWAP_DEBOUNCE_MS` | integer | `50` |
//!
//! Every malformed variable is reported, not just the first one:
//!
//! ```rust,ignore
//! match HotswapConfig::from_env() {
//!     Ok(config) => { /* use config */ }
//!     Err(ConfigError::Multiple { errors }) => {
//!         for error in errors {
//!             eprintln!("{error}");
//!         }
//!     }
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```
//!
//! After start-up, the runtime keys (`extensions`, `watch`, `autoreload`)
//! change only through [`Hotswap::configure`](crate::Hotswap::configure),
//! which takes a [`ConfigUpdate`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::{Diagnostic, NamedSource, SourceSpan};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hook::normalize_tag;
use crate::loader::DataFormat;
use crate::source::RetrySchedule;

/// Prefix of the environment variables read by default.
pub const DEFAULT_ENV_PREFIX: &str = "PROCSWAP_";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HotswapConfig {
    /// Tags routed through the engine.
    pub extensions: BTreeSet<String>,

    /// Whether tracked units are watched for changes.
    pub watch: bool,

    /// Whether a change reloads the unit automatically.
    pub autoreload: bool,

    /// Delays between read attempts, in milliseconds.
    pub retry_delays_ms: Vec<u64>,

    /// Window in which bursts of change events are coalesced, in milliseconds.
    pub debounce_ms: u64,
}

impl Default for HotswapConfig {
    fn default() -> Self {
        Self {
            extensions: BTreeSet::from([".hot".to_string()]),
            watch: true,
            autoreload: true,
            retry_delays_ms: vec![100, 300, 1000],
            debounce_ms: 100,
        }
    }
}

impl HotswapConfig {
    /// Returns the read retry schedule.
    #[must_use]
    pub fn retry_schedule(&self) -> RetrySchedule {
        RetrySchedule::from_millis(&self.retry_delays_ms)
    }

    /// Returns the debounce window.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Loads defaults overlaid with `PROCSWAP_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env(DEFAULT_ENV_PREFIX)
    }

    /// Loads a JSON or TOML file over the defaults.
    ///
    /// The format is chosen from the extension; anything else is read as
    /// TOML when that feature is enabled, JSON otherwise.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let format = DataFormat::from_path(path).unwrap_or(FALLBACK_FORMAT);
        Self::from_str_with_format(&content, format, &path.display().to_string())
    }

    /// Parses configuration text in the given format.
    ///
    /// `name` labels the source in diagnostics.
    pub fn from_str_with_format(
        content: &str,
        format: DataFormat,
        name: &str,
    ) -> Result<Self, ConfigError> {
        let value = parse_document(content, format, name)?;

        let mut config: Self = serde_path_to_error::deserialize(value).map_err(|e| {
            ConfigError::Field {
                source_name: name.to_string(),
                field: e.path().to_string(),
                message: e.inner().to_string(),
            }
        })?;

        config.extensions = config
            .extensions
            .iter()
            .map(|tag| normalize_tag(tag))
            .collect();
        Ok(config)
    }

    /// Overlays the environment variables starting with `prefix`.
    pub fn merge_env(mut self, prefix: &str) -> Result<Self, ConfigError> {
        let mut env = EnvReader::new(prefix);

        let update = ConfigUpdate::read(&mut env);
        let retry_delays = env.read("RETRY_DELAYS_MS", "comma-separated integers", parse_u64_list);
        let debounce = env.read("DEBOUNCE_MS", "integer", |s| s.trim().parse::<u64>().ok());

        env.finish()?;

        self.apply(&update);
        if let Some(delays) = retry_delays {
            self.retry_delays_ms = delays;
        }
        if let Some(debounce) = debounce {
            self.debounce_ms = debounce;
        }
        Ok(self)
    }

    /// Applies the keys present in `update`.
    pub fn apply(&mut self, update: &ConfigUpdate) {
        if let Some(extensions) = &update.extensions {
            self.extensions = extensions.iter().map(|tag| normalize_tag(tag)).collect();
        }
        if let Some(watch) = update.watch {
            self.watch = watch;
        }
        if let Some(autoreload) = update.autoreload {
            self.autoreload = autoreload;
        }
    }
}

#[cfg(feature = "toml")]
const FALLBACK_FORMAT: DataFormat = DataFormat::Toml;

#[cfg(not(feature = "toml"))]
const FALLBACK_FORMAT: DataFormat = DataFormat::Json;

/// A partial change of the runtime configuration.
///
/// Keys left as `None` are not touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigUpdate {
    /// New set of hooked tags.
    pub extensions: Option<Vec<String>>,

    /// New watch flag.
    pub watch: Option<bool>,

    /// New autoreload flag.
    pub autoreload: Option<bool>,
}

impl ConfigUpdate {
    /// Creates an update that changes nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hooked tags.
    #[must_use]
    pub fn extensions<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the watch flag.
    #[must_use]
    pub const fn watch(mut self, watch: bool) -> Self {
        self.watch = Some(watch);
        self
    }

    /// Sets the autoreload flag.
    #[must_use]
    pub const fn autoreload(mut self, autoreload: bool) -> Self {
        self.autoreload = Some(autoreload);
        self
    }

    /// Returns `true` if no key is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.extensions.is_none() && self.watch.is_none() && self.autoreload.is_none()
    }

    /// Reads the runtime keys from `PROCSWAP_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_prefix(DEFAULT_ENV_PREFIX)
    }

    /// Reads the runtime keys from variables starting with `prefix`.
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let mut env = EnvReader::new(prefix);
        let update = Self::read(&mut env);
        env.finish()?;
        Ok(update)
    }

    fn read(env: &mut EnvReader) -> Self {
        Self {
            extensions: env.read("EXTENSIONS", "comma-separated tags", parse_tags),
            watch: env.read("WATCH", "bool", parse_bool),
            autoreload: env.read("AUTORELOAD", "bool", parse_bool),
        }
    }
}

/// Errors from loading configuration.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("failed to parse {var}: expected {expected}, got '{value}'")]
    #[diagnostic(code(procswap::config::parse_error))]
    Parse {
        /// The variable name, including its prefix.
        var: String,

        /// The raw value.
        value: String,

        /// What was expected.
        expected: &'static str,

        /// How to fix it.
        #[help]
        help: String,
    },

    /// Several configuration errors occurred.
    #[error("{} configuration error(s)", .errors.len())]
    #[diagnostic(
        code(procswap::config::multiple_errors),
        help("fix all listed configuration errors")
    )]
    Multiple {
        /// All accumulated errors.
        #[related]
        errors: Vec<ConfigError>,
    },

    /// The configuration file could not be read.
    #[error("failed to read configuration file '{}'", .path.display())]
    #[diagnostic(
        code(procswap::config::read_error),
        help("check file permissions and ensure it's readable")
    )]
    Read {
        /// Path to the file.
        path: PathBuf,

        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON or TOML.
    #[error("{format} parse error in {source_name}")]
    #[diagnostic(
        code(procswap::config::syntax_error),
        help("check for missing quotes, invalid values, or syntax errors")
    )]
    Syntax {
        /// Format name.
        format: &'static str,

        /// Label of the source.
        source_name: String,

        /// The content, for display.
        #[source_code]
        src: NamedSource<String>,

        /// Location of the error.
        #[label("{message}")]
        span: SourceSpan,

        /// What went wrong.
        message: String,
    },

    /// A field of the configuration file has the wrong type or is unknown.
    #[error("invalid configuration at `{field}` in {source_name}: {message}")]
    #[diagnostic(
        code(procswap::config::field_error),
        help("known keys: extensions, watch, autoreload, retry_delays_ms, debounce_ms")
    )]
    Field {
        /// Label of the source.
        source_name: String,

        /// Path of the offending field.
        field: String,

        /// What went wrong.
        message: String,
    },
}

impl ConfigError {
    /// Wraps several errors, unwrapping a single one.
    #[must_use]
    pub fn multiple(mut errors: Vec<Self>) -> Self {
        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }
        Self::Multiple { errors }
    }
}

/// Reads prefixed variables and collects every parse failure.
struct EnvReader {
    prefix: String,
    errors: Vec<ConfigError>,
}

impl EnvReader {
    fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            errors: Vec::new(),
        }
    }

    fn read<T>(
        &mut self,
        key: &str,
        expected: &'static str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        let var = format!("{}{key}", self.prefix);
        let value = std::env::var(&var).ok()?;
        let parsed = parse(&value);
        if parsed.is_none() {
            self.errors.push(ConfigError::Parse {
                help: format!("set {var} to a valid {expected}"),
                var,
                value,
                expected,
            });
        }
        parsed
    }

    fn finish(self) -> Result<(), ConfigError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::multiple(self.errors))
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_tags(value: &str) -> Option<Vec<String>> {
    let tags: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(normalize_tag)
        .collect();
    if tags.iter().any(|tag| tag.contains(char::is_whitespace)) {
        return None;
    }
    Some(tags)
}

fn parse_u64_list(value: &str) -> Option<Vec<u64>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| item.parse::<u64>().ok())
        .collect()
}

fn parse_document(
    content: &str,
    format: DataFormat,
    name: &str,
) -> Result<serde_json::Value, ConfigError> {
    match format {
        DataFormat::Json => serde_json::from_str(content).map_err(|e| {
            let offset = line_col_to_offset(content, e.line(), e.column());
            syntax_error("JSON", content, name, offset, 1, e.to_string())
        }),

        #[cfg(feature = "toml")]
        DataFormat::Toml => {
            let value: toml::Value = toml::from_str(content).map_err(|e| {
                let (offset, len) = e
                    .span()
                    .map_or((0, 0), |span| (span.start, span.end - span.start));
                syntax_error("TOML", content, name, offset, len, e.message().to_string())
            })?;
            Ok(crate::loader::toml_to_json(value))
        }
    }
}

fn syntax_error(
    format: &'static str,
    content: &str,
    name: &str,
    offset: usize,
    len: usize,
    message: String,
) -> ConfigError {
    ConfigError::Syntax {
        format,
        source_name: name.to_string(),
        src: NamedSource::new(name, content.to_string()),
        span: SourceSpan::new(offset.min(content.len()).into(), len),
        message,
    }
}

/// Converts a 1-indexed line and column to a byte offset.
fn line_col_to_offset(content: &str, line: usize, col: usize) -> usize {
    let mut offset = 0;
    for (i, l) in content.lines().enumerate() {
        if i + 1 == line {
            return offset + col.saturating_sub(1);
        }
        offset += l.len() + 1;
    }
    offset
}
