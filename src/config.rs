//! Checker configuration
//!
//! Read from an `initsafe.toml` file:
//!
//! ```toml
//! report_override_risk = true
//! report_unknown_calls = false
//! classes = ["Account", "Ledger"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default configuration file name, looked up next to the checked file
pub const CONFIG_FILE: &str = "initsafe.toml";

/// Options for a checker run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckerConfig {
    /// Report calls that an override in a subclass could redirect
    pub report_override_risk: bool,
    /// Report calls whose body cannot be analyzed
    pub report_unknown_calls: bool,
    /// Only check these classes; empty means all
    pub classes: Vec<String>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            report_override_risk: true,
            report_unknown_calls: true,
            classes: Vec::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl CheckerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// `initsafe.toml` in `dir` if present, defaults otherwise
    pub fn discover(dir: &Path) -> Result<Self, ConfigError> {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Whether `class` is checked under this configuration
    pub fn selects(&self, class: &str) -> bool {
        self.classes.is_empty() || self.classes.iter().any(|c| c == class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = CheckerConfig::from_toml_str("").unwrap();
        assert_eq!(config, CheckerConfig::default());
        assert!(config.selects("Anything"));
    }

    #[test]
    fn test_partial_override() {
        let config = CheckerConfig::from_toml_str(
            "report_unknown_calls = false\nclasses = [\"A\"]\n",
        )
        .unwrap();
        assert!(config.report_override_risk);
        assert!(!config.report_unknown_calls);
        assert!(config.selects("A"));
        assert!(!config.selects("B"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = CheckerConfig::from_toml_str("report_everything = true").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
