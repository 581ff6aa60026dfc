//! Compiler configuration loaded from TOML.
//!
//! ```toml
//! [compiler]
//! base_uri = "https://example.org/odata"
//! key_as_segment = false
//! max_protocol_version = "4.01"
//! partial_evaluation = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::options::ProtocolVersion;

/// Settings that shape the emitted request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompilerConfig {
    /// Service root prepended to every resource path; may be empty.
    pub base_uri: String,
    /// Render single-part keys as `/Set/5` instead of `/Set(5)`.
    pub key_as_segment: bool,
    /// Highest protocol version the target service accepts.
    pub max_protocol_version: ProtocolVersion,
    /// Reduce closed subtrees to constants before binding.
    pub partial_evaluation: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            base_uri: String::new(),
            key_as_segment: false,
            max_protocol_version: ProtocolVersion::V4_01,
            partial_evaluation: true,
        }
    }
}

impl CompilerConfig {
    /// Loads `explicit`, or the default path when present, or defaults.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        match path {
            Some(path) if path.exists() => Self::from_raw(read_file(&path)?),
            _ => Ok(Self::default()),
        }
    }

    /// Parses a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(raw)
    }

    /// Serializes the effective configuration.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let raw = RawConfig {
            compiler: CompilerSection {
                base_uri: Some(self.base_uri.clone()),
                key_as_segment: Some(self.key_as_segment),
                max_protocol_version: Some(self.max_protocol_version.to_string()),
                partial_evaluation: Some(self.partial_evaluation),
            },
        };
        toml::to_string_pretty(&raw).map_err(|source| ConfigError::Serialize { source })
    }

    /// Service root without a trailing slash.
    pub fn service_root(&self) -> &str {
        self.base_uri.trim_end_matches('/')
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let section = raw.compiler;
        let max_protocol_version = match section.max_protocol_version {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidProtocolVersion { value })?,
            None => defaults.max_protocol_version,
        };
        Ok(Self {
            base_uri: section.base_uri.unwrap_or(defaults.base_uri),
            key_as_segment: section.key_as_segment.unwrap_or(defaults.key_as_segment),
            max_protocol_version,
            partial_evaluation: section
                .partial_evaluation
                .unwrap_or(defaults.partial_evaluation),
        })
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    compiler: CompilerSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct CompilerSection {
    base_uri: Option<String>,
    key_as_segment: Option<bool>,
    max_protocol_version: Option<String>,
    partial_evaluation: Option<bool>,
}

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// File is not valid TOML.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// Configuration could not be rendered.
    #[error("failed to serialize config: {source}")]
    Serialize {
        /// Underlying error.
        source: toml::ser::Error,
    },
    /// `max_protocol_version` is not a known version.
    #[error("protocol version '{value}' is invalid; expected 4.0 or 4.01")]
    InvalidProtocolVersion {
        /// Configured text.
        value: String,
    },
}

/// `<config dir>/odataq/config.toml`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("odataq").join("config.toml"))
}
