//! Daemon configuration: built-in defaults merged with an on-disk
//! `daemon.toml`, with CLI flags overriding both.
//!
//! A two-tier cascade: defaults, then the single on-disk file, since the
//! daemon has no team/project config surface to layer further tiers onto.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Complete daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub listen_addr: String,
    pub bootstrap_peers: Vec<String>,
    pub bridge: BridgeConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            listen_addr: "0.0.0.0:7878".to_string(),
            bootstrap_peers: Vec::new(),
            bridge: BridgeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub max_workers: usize,
    pub queue_depth: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            max_workers: 16,
            queue_depth: 256,
        }
    }
}

impl DaemonConfig {
    /// Loads the on-disk config at `path`, if present, merged over the
    /// built-in defaults. A missing file is not an error; an unparseable
    /// one is.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = DaemonConfig::default();
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            let on_disk: DaemonConfig = toml::from_str(&text)?;
            config = on_disk;
        }
        Ok(config)
    }

    /// Applies CLI-flag overrides, which take precedence over both the
    /// built-in defaults and the on-disk file.
    pub fn apply_overrides(&mut self, listen_addr: Option<String>, extra_bootstrap: Vec<String>) {
        if let Some(addr) = listen_addr {
            self.listen_addr = addr;
        }
        self.bootstrap_peers.extend(extra_bootstrap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:7878");
        assert!(config.bootstrap_peers.is_empty());
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let config = DaemonConfig::load(Path::new("/nonexistent/daemon.toml")).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:7878");
    }

    #[test]
    fn test_load_parses_on_disk_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.toml");
        std::fs::write(&path, "listen_addr = \"127.0.0.1:9000\"\nbootstrap_peers = [\"peer-a:1\"]\n").unwrap();
        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.bootstrap_peers, vec!["peer-a:1".to_string()]);
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = DaemonConfig::default();
        config.apply_overrides(Some("127.0.0.1:1".to_string()), vec!["extra:2".to_string()]);
        assert_eq!(config.listen_addr, "127.0.0.1:1");
        assert_eq!(config.bootstrap_peers, vec!["extra:2".to_string()]);
    }
}
