//! Client settings persisted as YAML

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Directory used when none is given: `<user data dir>/btorrent`
pub fn default_config_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("btorrent")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port we listen on and announce to trackers
    pub port: u16,
    pub udp_port: u16,
    /// Peers requested per announce
    pub num_want: i32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 6881,
            udp_port: 8881,
            num_want: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// HTTP proxy for trackers as `host:port`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub proxies: ProxyConfig,

    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Config {
    /// Load `config.yaml` from `dir`, filling in defaults, and write it back
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;

        let path = dir.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.path = Some(path);
        config.save()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty file deserializes to unit, not a mapping
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.port == 0 {
            anyhow::bail!("network.port must not be 0");
        }
        if let Some(proxy) = &self.proxies.http {
            if !proxy.contains(':') {
                anyhow::bail!("proxies.http must be host:port, got {:?}", proxy);
            }
        }
        Ok(())
    }

    /// Where this config is saved, if it was loaded from a directory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the config back to its file; a config without a file is left alone
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network.port, 6881);
        assert_eq!(config.network.udp_port, 8881);
        assert_eq!(config.network.num_want, 5);
        assert_eq!(config.proxies.http, None);
    }

    #[test]
    fn test_partial_yaml() {
        let config = Config::from_yaml("network:\n  port: 7000\n").unwrap();
        assert_eq!(config.network.port, 7000);
        assert_eq!(config.network.num_want, 5);

        let config = Config::from_yaml("proxies:\n  http: abc.com:123\n").unwrap();
        assert_eq!(config.proxies.http.as_deref(), Some("abc.com:123"));
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
    }

    #[test]
    fn test_validation() {
        assert!(Config::from_yaml("network:\n  port: 0\n").is_err());
        assert!(Config::from_yaml("proxies:\n  http: abc.com\n").is_err());
        assert!(Config::from_yaml("network: [1, 2]\n").is_err());
    }

    #[test]
    fn test_load_creates_and_rereads() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::load(dir.path()).unwrap();
        let file = dir.path().join(CONFIG_FILE_NAME);
        assert!(file.exists());
        assert_eq!(config.path(), Some(file.as_path()));

        config.network.num_want = 50;
        config.proxies.http = Some("proxy.test:3128".to_string());
        config.save().unwrap();

        let reloaded = Config::load(dir.path()).unwrap();
        assert_eq!(reloaded.network.num_want, 50);
        assert_eq!(reloaded.proxies.http.as_deref(), Some("proxy.test:3128"));
    }
}
