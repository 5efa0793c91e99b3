//! Analysis options.
//!
//! Options come from TOML (`AnalysisOptions::from_toml_str`, `from_file`) or
//! from `PYFLOW_*` environment variables layered over the defaults
//! (`AnalysisOptions::from_env`).

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default ceiling for the typegraph complexity counter.
pub const DEFAULT_COMPLEXITY_LIMIT: u64 = 2_000_000;

/// Default bound on the interpreted call stack.
pub const DEFAULT_MAX_DEPTH: usize = 40;

/// Default cap on argument combinations tried per library call.
pub const DEFAULT_MAX_NATIVE_VIEWS: usize = 64;

/// Errors raised while reading options.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("invalid options TOML: {0}")]
    Toml(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("unsupported python version {0}.{1}")]
    UnsupportedVersion(u8, u8),
}

/// Knobs that control how much work the interpreter does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Target language version as (major, minor).
    pub python_version: (u8, u8),
    /// Interpreted calls are refused once the frame stack holds more than
    /// this many frames. `0` analyses the module body only.
    pub max_depth: usize,
    /// Typegraph cost ceiling. `None` disables the circuit breaker.
    pub complexity_limit: Option<u64>,
    /// Try `__radd__` and friends when the left operand has no method.
    pub reverse_operators: bool,
    /// Count executed opcodes.
    pub profile_opcodes: bool,
    /// Cap on argument combinations tried per library call.
    pub max_native_views: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            python_version: (2, 7),
            max_depth: DEFAULT_MAX_DEPTH,
            complexity_limit: Some(DEFAULT_COMPLEXITY_LIMIT),
            reverse_operators: false,
            profile_opcodes: false,
            max_native_views: DEFAULT_MAX_NATIVE_VIEWS,
        }
    }
}

impl AnalysisOptions {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let options: AnalysisOptions =
            toml::from_str(text).map_err(|e| ConfigError::Toml(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Defaults overlaid with `PYFLOW_MAX_DEPTH`, `PYFLOW_COMPLEXITY_LIMIT`,
    /// `PYFLOW_REVERSE_OPERATORS` and `PYFLOW_PYTHON_VERSION`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from a key lookup. Empty values are ignored.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get("PYFLOW_MAX_DEPTH") {
            self.max_depth = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "PYFLOW_MAX_DEPTH",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = get("PYFLOW_COMPLEXITY_LIMIT") {
            self.complexity_limit = match raw.trim() {
                "none" | "off" | "0" => None,
                text => Some(text.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "PYFLOW_COMPLEXITY_LIMIT",
                    value: raw.clone(),
                })?),
            };
        }
        if let Some(raw) = get("PYFLOW_REVERSE_OPERATORS") {
            self.reverse_operators = parse_flag(&raw).ok_or(ConfigError::InvalidValue {
                key: "PYFLOW_REVERSE_OPERATORS",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = get("PYFLOW_PYTHON_VERSION") {
            self.python_version = parse_version(&raw).ok_or(ConfigError::InvalidValue {
                key: "PYFLOW_PYTHON_VERSION",
                value: raw.clone(),
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (major, minor) = self.python_version;
        if major != 2 && major != 3 {
            return Err(ConfigError::UnsupportedVersion(major, minor));
        }
        if self.max_native_views == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_native_views",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_python3(&self) -> bool {
        self.python_version.0 == 3
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_version(raw: &str) -> Option<(u8, u8)> {
    let (major, minor) = raw.trim().split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// `PYFLOW_TRACE_OPCODES=1` forces opcode tracing and profiling.
pub(crate) fn trace_opcodes_enabled() -> bool {
    use std::sync::OnceLock;
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        env::var("PYFLOW_TRACE_OPCODES")
            .ok()
            .and_then(|v| parse_flag(&v))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = AnalysisOptions::default();
        assert_eq!(options.python_version, (2, 7));
        assert!(!options.reverse_operators);
        assert_eq!(options.max_native_views, 64);
        assert!(!options.is_python3());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let options = AnalysisOptions::from_toml_str(
            "python_version = [3, 6]\nreverse_operators = true\n",
        )
        .unwrap();
        assert_eq!(options.python_version, (3, 6));
        assert!(options.reverse_operators);
        assert_eq!(options.max_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        let err = AnalysisOptions::from_toml_str("max_depth = \"deep\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_unsupported_version() {
        let err = AnalysisOptions::from_toml_str("python_version = [4, 0]").unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedVersion(4, 0));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_depth = 3").unwrap();
        writeln!(file, "complexity_limit = 500").unwrap();
        let options = AnalysisOptions::from_file(file.path()).unwrap();
        assert_eq!(options.max_depth, 3);
        assert_eq!(options.complexity_limit, Some(500));
    }

    #[test]
    fn test_missing_file() {
        let err = AnalysisOptions::from_file("/nonexistent/pyflow.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PYFLOW_MAX_DEPTH", "7"),
            ("PYFLOW_COMPLEXITY_LIMIT", "off"),
            ("PYFLOW_REVERSE_OPERATORS", "yes"),
            ("PYFLOW_PYTHON_VERSION", "3.5"),
        ]
        .into_iter()
        .collect();
        let options = AnalysisOptions::default()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(options.max_depth, 7);
        assert_eq!(options.complexity_limit, None);
        assert!(options.reverse_operators);
        assert_eq!(options.python_version, (3, 5));
    }

    #[test]
    fn test_invalid_override() {
        let err = AnalysisOptions::default()
            .with_overrides(|k| (k == "PYFLOW_MAX_DEPTH").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "PYFLOW_MAX_DEPTH",
                ..
            }
        ));
    }
}
