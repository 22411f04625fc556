//! Pan Configuration System
//!
//! Loads configuration from YAML files with a cascading priority system:
//! 1. `./pan.yaml` (current directory - highest priority)
//! 2. `~/.pan.yaml` (home directory)
//! 3. `~/.config/pan/pan.yaml` (user config directory)
//! 4. `/etc/pan/pan.yaml` (system - lowest priority)
//!
//! Values from higher priority files override those from lower priority files.
//!
//! # YAML Structure
//!
//! ```yaml
//! root_path: /var/lib/pan
//! name: workstation
//! node:
//!   address: ["0.0.0.0:9000"]
//!   public_address: ["0.0.0.0:9000"]
//! broadcast:
//!   address: ["224.0.0.120:9100"]
//! guard:
//!   enabled: false
//!   access: true
//! ```

mod listener;
mod node;
mod transport;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use listener::{AppConfig, ConfigListener};
pub use node::{GuardConfig, NodeConfig};
pub use transport::{BroadcastConfig, WebConfig};

/// Default config filename.
const CONFIG_FILENAME: &str = "pan.yaml";

/// Default root directory name under the home directory.
const DEFAULT_ROOT_DIR: &str = ".pan";

/// Fallback node name when the host name is unknown.
const DEFAULT_NAME: &str = "pan";

/// Private key file name under the root path.
pub const KEY_FILENAME: &str = "key.pem";

/// Certificate file name under the root path.
pub const CERT_FILENAME: &str = "cert.pem";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppSettings {
    /// Directory anchoring `key.pem` and `cert.pem` (`root_path`).
    /// Defaults to `~/.pan`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_path: Option<PathBuf>,

    /// Human-readable node name (`name`). Defaults to the host name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Node endpoints (`node.*`).
    #[serde(default)]
    pub node: NodeConfig,

    /// Multicast discovery (`broadcast.*`).
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Management surface (`web.*`).
    #[serde(default)]
    pub web: WebConfig,

    /// Access guard (`guard.*`).
    #[serde(default)]
    pub guard: GuardConfig,
}

impl AppSettings {
    /// Create a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the standard search paths.
    ///
    /// Returns a tuple of (settings, paths_loaded) where paths_loaded
    /// contains the paths that were successfully loaded.
    pub fn load() -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let search_paths = Self::search_paths();
        Self::load_from_paths(&search_paths)
    }

    /// Load configuration from specific paths.
    ///
    /// Paths are processed in order, with later paths overriding earlier ones.
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<(Self, Vec<PathBuf>), ConfigError> {
        let mut settings = AppSettings::default();
        let mut loaded_paths = Vec::new();

        for path in paths {
            if path.exists() {
                let file_settings = Self::load_file(path)?;
                settings.merge(file_settings);
                loaded_paths.push(path.clone());
            }
        }

        Ok((settings, loaded_paths))
    }

    /// Load configuration from a single file.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        // An empty file parses as YAML null.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the standard search paths in priority order (lowest to highest).
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // System config (lowest priority)
        paths.push(PathBuf::from("/etc/pan").join(CONFIG_FILENAME));

        // User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("pan").join(CONFIG_FILENAME));
        }

        // Home directory
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".pan.yaml"));
        }

        // Current directory (highest priority)
        paths.push(PathBuf::from(".").join(CONFIG_FILENAME));

        paths
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` when present.
    pub fn merge(&mut self, other: AppSettings) {
        if other.root_path.is_some() {
            self.root_path = other.root_path;
        }
        if other.name.is_some() {
            self.name = other.name;
        }
        self.node.merge(other.node);
        self.broadcast.merge(other.broadcast);
        self.web.merge(other.web);
        self.guard.merge(other.guard);
    }

    /// Root directory, using `~/.pan` if not configured.
    pub fn root_path(&self) -> PathBuf {
        match &self.root_path {
            Some(path) => path.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_ROOT_DIR),
        }
    }

    /// Node name, using the host name if not configured.
    pub fn name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        std::fs::read_to_string("/etc/hostname")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_NAME.to_string())
    }

    /// Path of the PEM private key.
    pub fn key_path(&self) -> PathBuf {
        self.root_path().join(KEY_FILENAME)
    }

    /// Path of the PEM certificate.
    pub fn cert_path(&self) -> PathBuf {
        self.root_path().join(CERT_FILENAME)
    }

    /// QUIC bind addresses.
    pub fn node_addresses(&self) -> Vec<String> {
        self.node.addresses()
    }

    /// Addresses advertised over multicast.
    pub fn public_addresses(&self) -> Vec<String> {
        self.node.public_addresses()
    }

    /// Multicast group addresses.
    pub fn broadcast_addresses(&self) -> Vec<String> {
        self.broadcast.addresses()
    }

    /// Management addresses.
    pub fn web_addresses(&self) -> Vec<String> {
        self.web.addresses()
    }

    pub fn guard_enabled(&self) -> bool {
        self.guard.is_enabled()
    }

    pub fn guard_access(&self) -> bool {
        self.guard.allows_access()
    }

    pub fn dial_timeout(&self) -> Duration {
        self.node.dial_timeout()
    }

    /// Serialize this configuration to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = AppSettings::new();
        assert_eq!(settings.node_addresses(), vec!["0.0.0.0:9000"]);
        assert_eq!(settings.public_addresses(), vec!["0.0.0.0:9000"]);
        assert_eq!(settings.broadcast_addresses(), vec!["224.0.0.120:9100"]);
        assert_eq!(settings.web_addresses(), vec!["127.0.0.1:9002"]);
        assert!(!settings.guard_enabled());
        assert!(settings.guard_access());
        assert_eq!(settings.dial_timeout(), Duration::from_secs(3));
        assert!(settings.root_path().ends_with(".pan"));
        assert!(!settings.name().is_empty());
    }

    #[test]
    fn test_public_address_follows_node_address() {
        let yaml = r#"
node:
  address: ["127.0.0.1:7000"]
"#;
        let settings: AppSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.public_addresses(), vec!["127.0.0.1:7000"]);
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
root_path: /tmp/pan-test
name: alpha
node:
  address: ["0.0.0.0:9500"]
  public_address: ["10.0.0.5:9500"]
  dial_timeout_ms: 500
broadcast:
  address: ["224.0.0.121:9101", "[ff02::1]:9101"]
guard:
  enabled: true
  access: false
"#;
        let settings: AppSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.root_path(), PathBuf::from("/tmp/pan-test"));
        assert_eq!(settings.key_path(), PathBuf::from("/tmp/pan-test/key.pem"));
        assert_eq!(settings.cert_path(), PathBuf::from("/tmp/pan-test/cert.pem"));
        assert_eq!(settings.name(), "alpha");
        assert_eq!(settings.public_addresses(), vec!["10.0.0.5:9500"]);
        assert_eq!(settings.broadcast_addresses().len(), 2);
        assert_eq!(settings.dial_timeout(), Duration::from_millis(500));
        assert!(settings.guard_enabled());
        assert!(!settings.guard_access());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "node:\n  bogus: 1\n";
        assert!(serde_yaml::from_str::<AppSettings>(yaml).is_err());
    }

    #[test]
    fn test_merge_overrides_present_fields() {
        let mut base = AppSettings::new();
        base.name = Some("base".to_string());
        base.node.address = Some(vec!["0.0.0.0:1".to_string()]);

        let mut other = AppSettings::new();
        other.node.address = Some(vec!["0.0.0.0:2".to_string()]);
        other.guard.enabled = Some(true);

        base.merge(other);
        assert_eq!(base.name(), "base");
        assert_eq!(base.node_addresses(), vec!["0.0.0.0:2"]);
        assert!(base.guard_enabled());
    }

    #[test]
    fn test_load_from_paths_priority() {
        let dir = TempDir::new().unwrap();
        let low = dir.path().join("low.yaml");
        let high = dir.path().join("high.yaml");
        let missing = dir.path().join("missing.yaml");

        fs::write(&low, "name: low\nnode:\n  address: [\"0.0.0.0:1\"]\n").unwrap();
        fs::write(&high, "name: high\n").unwrap();

        let (settings, loaded) =
            AppSettings::load_from_paths(&[low.clone(), missing, high.clone()]).unwrap();
        assert_eq!(loaded, vec![low, high]);
        assert_eq!(settings.name(), "high");
        assert_eq!(settings.node_addresses(), vec!["0.0.0.0:1"]);
    }

    #[test]
    fn test_load_file_errors() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("bad.yaml");
        fs::write(&bad, "node: [not, a, map]\n").unwrap();

        assert!(matches!(
            AppSettings::load_file(&bad),
            Err(ConfigError::ParseYaml { .. })
        ));
        assert!(matches!(
            AppSettings::load_file(&dir.path().join("nope.yaml")),
            Err(ConfigError::ReadFile { .. })
        ));
    }

    #[test]
    fn test_empty_file_is_default() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.yaml");
        fs::write(&empty, "").unwrap();
        assert_eq!(AppSettings::load_file(&empty).unwrap(), AppSettings::default());
    }

    #[test]
    fn test_yaml_roundtrip_skips_unset() {
        let mut settings = AppSettings::new();
        settings.name = Some("n".to_string());
        let yaml = settings.to_yaml().unwrap();
        assert!(yaml.contains("name: n"));
        assert!(!yaml.contains("root_path"));
        let parsed: AppSettings = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, settings);
    }
}
