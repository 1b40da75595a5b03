//! Server configuration via `strata-remote.toml`
//!
//! A missing file means defaults. `--init` on the command line writes the
//! commented default file; edit it and restart to change settings.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use strata_core::{StrataError, StrataResult};
use strata_storage::CachingPolicy;

use crate::protocol::DEFAULT_PORT;

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "strata-remote.toml";

/// Server configuration loaded from `strata-remote.toml`.
///
/// # Example
///
/// ```toml
/// bind = "0.0.0.0:1208"
/// subscriber_ack_timeout_ms = 30000
///
/// [caching]
/// cached_reads = true
/// bloom_filter = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// How long a flush waits on one subscriber's acknowledgement, in
    /// milliseconds. `0` waits forever.
    #[serde(default = "default_ack_timeout_ms")]
    pub subscriber_ack_timeout_ms: u64,
    /// Caching policy of every collection the server creates
    #[serde(default)]
    pub caching: CachingPolicy,
    /// Expected keys per collection, sizes the membership filter
    #[serde(default = "default_bloom_expected_items")]
    pub bloom_expected_items: usize,
    /// Target false positive rate of the membership filter
    #[serde(default = "default_bloom_false_positive_rate")]
    pub bloom_false_positive_rate: f64,
}

fn default_bind() -> String {
    format!("0.0.0.0:{}", DEFAULT_PORT)
}

fn default_ack_timeout_ms() -> u64 {
    30_000
}

fn default_bloom_expected_items() -> usize {
    100_000
}

fn default_bloom_false_positive_rate() -> f64 {
    0.01
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            subscriber_ack_timeout_ms: default_ack_timeout_ms(),
            caching: CachingPolicy::default(),
            bloom_expected_items: default_bloom_expected_items(),
            bloom_false_positive_rate: default_bloom_false_positive_rate(),
        }
    }
}

impl ServerConfig {
    /// Config bound to an ephemeral loopback port, for tests and embedding
    pub fn ephemeral() -> Self {
        Self {
            bind: "127.0.0.1:0".to_string(),
            ..Self::default()
        }
    }

    /// Parsed listen address
    ///
    /// # Errors
    ///
    /// Returns an error if `bind` is not `ip:port`.
    pub fn bind_addr(&self) -> StrataResult<SocketAddr> {
        self.bind.parse().map_err(|e| {
            StrataError::config(format!("Invalid bind address '{}': {}", self.bind, e))
        })
    }

    /// Subscriber ack timeout, None for unbounded
    pub fn ack_timeout(&self) -> Option<Duration> {
        match self.subscriber_ack_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Check every field
    pub fn validate(&self) -> StrataResult<()> {
        self.bind_addr()?;
        if !(self.bloom_false_positive_rate > 0.0 && self.bloom_false_positive_rate < 1.0) {
            return Err(StrataError::config(format!(
                "bloom_false_positive_rate must be in (0, 1), got {}",
                self.bloom_false_positive_rate
            )));
        }
        if self.bloom_expected_items == 0 {
            return Err(StrataError::config("bloom_expected_items must be positive"));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Strata remote server configuration
#
# Listen address (default port 1208)
bind = "0.0.0.0:1208"

# How long a flush waits for each change subscriber to acknowledge a
# notification, in milliseconds. A subscriber that does not answer in time
# is dropped. 0 waits forever.
subscriber_ack_timeout_ms = 30000

# Membership filter sizing for every collection
bloom_expected_items = 100000
bloom_false_positive_rate = 0.01

# Caching policy for every collection the server creates
[caching]
cached_reads = true
bloom_filter = true
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> StrataResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StrataError::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: ServerConfig = toml::from_str(&content).map_err(|e| {
            StrataError::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> StrataResult<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> StrataResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                StrataError::config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> StrataResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StrataError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            StrataError::config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_listens_on_1208() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr().unwrap().port(), 1208);
        assert_eq!(config.ack_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.caching, CachingPolicy::cached_and_bloom());
    }

    #[test]
    fn default_toml_matches_default() {
        let config: ServerConfig = toml::from_str(ServerConfig::default_toml()).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn zero_timeout_is_unbounded() {
        let config: ServerConfig = toml::from_str("subscriber_ack_timeout_ms = 0").unwrap();
        assert_eq!(config.ack_timeout(), None);
    }

    #[test]
    fn partial_caching_section() {
        let config: ServerConfig = toml::from_str("[caching]\nbloom_filter = false").unwrap();
        assert!(config.caching.cached_reads);
        assert!(!config.caching.bloom_filter);
    }

    #[test]
    fn invalid_bind_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "bind = \"not an address\"").unwrap();
        assert!(matches!(
            ServerConfig::from_file(&path),
            Err(StrataError::Config(msg)) if msg.contains("bind")
        ));
    }

    #[test]
    fn invalid_rate_rejected() {
        let config = ServerConfig {
            bloom_false_positive_rate: 1.5,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        ServerConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());
        assert_eq!(ServerConfig::from_file(&path).unwrap(), ServerConfig::default());
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "bind = \"127.0.0.1:9000\"").unwrap();

        ServerConfig::write_default_if_missing(&path).unwrap();
        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
    }

    #[test]
    fn write_to_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = ServerConfig {
            bind: "127.0.0.1:4000".to_string(),
            subscriber_ack_timeout_ms: 0,
            ..ServerConfig::default()
        };
        config.write_to_file(&path).unwrap();
        assert_eq!(ServerConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ServerConfig::default());
    }
}
