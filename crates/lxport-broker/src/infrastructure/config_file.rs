//! TOML configuration file for the broker.
//!
//! Every key is optional; an absent key takes the same default as the
//! matching command-line flag.
//!
//! ```toml
//! [broker]
//! listen = "0.0.0.0:8010"
//! xport_path = "/xport"
//! pair_path = "/pair"
//! keepalive_interval = 30   # seconds
//! pair_timeout = 5          # seconds
//! log_level = "info"
//! ```
//!
//! Command-line flags override file values (see `main.rs`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::{DEFAULT_LISTEN_ADDR, DEFAULT_PAIR_PATH, DEFAULT_XPORT_PATH};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level layout of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigFile {
    #[serde(default)]
    pub broker: BrokerSection,
}

/// The `[broker]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerSection {
    /// `host:port` of the listener.
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_xport_path")]
    pub xport_path: String,
    #[serde(default = "default_pair_path")]
    pub pair_path: String,
    /// Seconds between keepalive sweeps.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
    /// Seconds a pairing request waits for the device.
    #[serde(default = "default_pair_timeout")]
    pub pair_timeout: u64,
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_listen() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}
fn default_xport_path() -> String {
    DEFAULT_XPORT_PATH.to_string()
}
fn default_pair_path() -> String {
    DEFAULT_PAIR_PATH.to_string()
}
fn default_keepalive_interval() -> u64 {
    30
}
fn default_pair_timeout() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            xport_path: default_xport_path(),
            pair_path: default_pair_path(),
            keepalive_interval: default_keepalive_interval(),
            pair_timeout: default_pair_timeout(),
            log_level: default_log_level(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses config file text.
pub fn parse_config(text: &str) -> Result<ConfigFile, ConfigError> {
    Ok(toml::from_str(text)?)
}

/// Loads the config file at `path`.
///
/// The file was named explicitly by the operator, so a missing file is an
/// error rather than a silent fallback to defaults.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`] if
/// the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{prefix}-{}.toml", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg, ConfigFile::default());
        assert_eq!(cfg.broker.listen, "127.0.0.1:8010");
        assert_eq!(cfg.broker.pair_timeout, 5);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        // Arrange
        let text = r#"
            [broker]
            listen = "0.0.0.0:9000"
            pair_timeout = 12
        "#;

        // Act
        let cfg = parse_config(text).unwrap();

        // Assert
        assert_eq!(cfg.broker.listen, "0.0.0.0:9000");
        assert_eq!(cfg.broker.pair_timeout, 12);
        assert_eq!(cfg.broker.xport_path, "/xport");
        assert_eq!(cfg.broker.keepalive_interval, 30);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = parse_config("[broker\nlisten = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let result = parse_config("[broker]\npair_timeout = \"soon\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_io_error_naming_the_path() {
        let path = temp_path("lxport-missing");

        let err = load_config(&path).unwrap_err();

        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("lxport-missing-"));
    }

    #[test]
    fn test_load_config_reads_file() {
        // Arrange
        let path = temp_path("lxport-broker");
        std::fs::write(&path, "[broker]\npair_path = \"/p\"\n").unwrap();

        // Act
        let cfg = load_config(&path);
        let _ = std::fs::remove_file(&path);

        // Assert
        assert_eq!(cfg.unwrap().broker.pair_path, "/p");
    }

    #[test]
    fn test_defaults_serialize_and_parse_back() {
        let text = toml::to_string_pretty(&ConfigFile::default()).unwrap();
        assert_eq!(parse_config(&text).unwrap(), ConfigFile::default());
    }
}
