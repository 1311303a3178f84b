//! YAML-based configuration system for vaultkeeper.
//!
//! Configuration can be loaded from a file named by the `CONF_PATH`
//! environment variable, or built entirely from defaults if the variable
//! is unset or empty.
//!
//! # Example config file
//!
//! ```yaml
//! unlocker:
//!   number_keys: 3
//!   url: "http://localhost:8200"
//! storage:
//!   type: boltdb
//!   boltdb:
//!     path: /home/vaultkeeper/data/bolt.db
//! provisioner:
//!   policies:
//!     - name: readonly
//!       rules: "path \"secret/*\" { capabilities = [\"read\"] }"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Top-level configuration for the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub unlocker: UnlockerConfig,
    pub manager: ManagerConfig,
    pub encryption: EncryptionConfig,
    pub storage: StorageConfig,
    pub provisioner: ProvisionerConfig,
    pub exporters: Option<ExporterConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unlocker: UnlockerConfig::default(),
            manager: ManagerConfig::default(),
            encryption: EncryptionConfig::default(),
            storage: StorageConfig::default(),
            provisioner: ProvisionerConfig::default(),
            exporters: None,
        }
    }
}

/// Unseal-related settings: how many key shares to request and where the
/// secret server lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UnlockerConfig {
    pub number_keys: i64,
    pub url: String,
    pub request_timeout_secs: u64,
}

impl Default for UnlockerConfig {
    fn default() -> Self {
        Self {
            number_keys: 3,
            url: "http://localhost:8200".to_string(),
            request_timeout_secs: 5,
        }
    }
}

/// Periodic-driver cadence settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManagerConfig {
    pub repeat_interval_secs: u64,
    pub operation_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            repeat_interval_secs: 60,
            operation_timeout_secs: 50,
        }
    }
}

/// Directory holding the local RSA key pair used to wrap stored shares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncryptionConfig {
    pub path: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            path: "/home/vaultkeeper/data/encryption/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub boltdb: BoltDbConfig,
    pub kubernetes: KubernetesConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: "boltdb".to_string(),
            boltdb: BoltDbConfig::default(),
            kubernetes: KubernetesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoltDbConfig {
    pub path: String,
}

impl Default for BoltDbConfig {
    fn default() -> Self {
        Self {
            path: "/home/vaultkeeper/data/bolt.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KubernetesConfig {
    pub access: String,
    pub namespace: String,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            access: "in-cluster".to_string(),
            namespace: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProvisionerConfig {
    pub policies: Vec<PolicyConfig>,
    pub auth: Vec<AuthMountConfig>,
    pub mounts: Vec<SecretMountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    pub name: String,
    pub rules: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthMountConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    pub users: Vec<UserConfig>,
    pub approles: Vec<AppRoleConfig>,
}

impl Default for AuthMountConfig {
    fn default() -> Self {
        Self {
            kind: "userpass".to_string(),
            path: "userpass".to_string(),
            users: Vec::new(),
            approles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserConfig {
    pub name: String,
    pub pass: String,
    pub policies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppRoleConfig {
    pub name: String,
    pub policies: Vec<String>,
    #[serde(default = "default_secret_id_ttl")]
    pub secret_id_ttl: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl: String,
    #[serde(default = "default_token_max_ttl")]
    pub token_max_ttl: String,
    pub export: Option<AppRoleExportConfig>,
}

fn default_secret_id_ttl() -> String {
    "24h".to_string()
}
fn default_token_ttl() -> String {
    "1h".to_string()
}
fn default_token_max_ttl() -> String {
    "4h".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppRoleExportConfig {
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecretMountConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    pub secrets: Vec<SecretConfig>,
}

impl Default for SecretMountConfig {
    fn default() -> Self {
        Self {
            kind: "kv-v2".to_string(),
            path: "unlocker".to_string(),
            secrets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecretConfig {
    pub path: String,
    pub name: String,
    pub data: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExporterConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub kubernetes: KubernetesConfig,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            kind: "kubernetes".to_string(),
            kubernetes: KubernetesConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the path named by `CONF_PATH`, falling back
    /// to defaults if the variable is unset or empty, then validate it.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match std::env::var("CONF_PATH") {
            Ok(path) if !path.trim().is_empty() => Self::load_from_file(Path::new(&path))?,
            _ => Config::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(config)
    }

    /// Validate configuration values, returning a message that names the
    /// offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.unlocker.number_keys < 1 || self.unlocker.number_keys > 5 {
            return Err(ConfigError::ValidationError(format!(
                "unlocker.number_keys must be between 1 and 5, got {}",
                self.unlocker.number_keys
            )));
        }

        let valid_storage = ["boltdb", "kubernetes"];
        if !valid_storage.contains(&self.storage.kind.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "storage.type must be one of {:?}, got \"{}\"",
                valid_storage, self.storage.kind
            )));
        }

        let valid_access = ["in-cluster", "out-cluster"];
        if !valid_access.contains(&self.storage.kubernetes.access.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "storage.kubernetes.access must be one of {:?}, got \"{}\"",
                valid_access, self.storage.kubernetes.access
            )));
        }

        if let Some(exporter) = &self.exporters {
            if exporter.kind != "kubernetes" {
                return Err(ConfigError::ValidationError(format!(
                    "exporters.type must be \"kubernetes\", got \"{}\"",
                    exporter.kind
                )));
            }
            if !valid_access.contains(&exporter.kubernetes.access.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "exporters.kubernetes.access must be one of {:?}, got \"{}\"",
                    valid_access, exporter.kubernetes.access
                )));
            }
        }

        Ok(())
    }

    /// Save configuration to a file (used by tests and operator tooling).
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let yaml_string = serde_yaml::to_string(self).map_err(|e| {
            ConfigError::ValidationError(format!("failed to serialize config: {}", e))
        })?;

        fs::write(path, yaml_string).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.unlocker.number_keys, 3);
        assert_eq!(config.unlocker.url, "http://localhost:8200");
        assert_eq!(config.storage.kind, "boltdb");
        assert_eq!(config.storage.kubernetes.access, "in-cluster");
        assert_eq!(config.manager.repeat_interval_secs, 60);
        assert_eq!(config.manager.operation_timeout_secs, 50);
        assert!(config.exporters.is_none());
    }

    #[test]
    fn empty_document_parses_to_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn good_config_overrides_defaults() {
        let yaml = r#"
unlocker:
  number_keys: 3
  url: "myurl"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.unlocker.number_keys, 3);
        assert_eq!(config.unlocker.url, "myurl");
        config.validate().unwrap();
    }

    #[test]
    fn bad_number_keys_is_rejected_with_value_in_message() {
        for bad in [-1_i64, 6] {
            let mut config = Config::default();
            config.unlocker.number_keys = bad;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(&bad.to_string()), "{err}");
        }
    }

    #[test]
    fn unknown_storage_type_is_rejected() {
        let mut config = Config::default();
        config.storage.kind = "redis".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("redis"));
    }

    #[test]
    fn load_from_file_roundtrips() {
        let yaml = r#"
storage:
  type: boltdb
  boltdb:
    path: "/tmp/bolt.db"
"#;
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();

        let config = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.storage.boltdb.path, "/tmp/bolt.db");
    }

    #[test]
    fn save_and_load_roundtrip() {
        let config = Config::default();
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();
        let loaded = Config::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config, loaded);
    }
}
