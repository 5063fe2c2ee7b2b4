//! Node configuration file handling
//!
//! Provides default configuration generation and loading for a zkattest
//! node. Configuration files are TOML and live in the node's data directory
//! next to the attestation database.
//!
//! ## Sections
//!
//! - `[node]`: where to listen and what to call ourselves in logs
//! - `[protocol]`: attestation protocol tuning (chunk size, challenge window,
//!   honesty probes, timeouts)
//! - `[storage]`: attestation database location
//! - `[attributes]`: values this node certifies when acting as attestor
//! - `[verification]`: whether peers may verify our attestations
//! - `[logging]`: level and optional log file

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use zkattest::CommunityConfig;

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

/// Default UDP listen address
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Prefix marking an attribute value written as hex
const HEX_PREFIX: &str = "hex:";

/// zkattest node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network identity and listen address
    pub node: NodeSection,

    /// Attestation protocol settings
    #[serde(default)]
    pub protocol: CommunityConfig,

    /// Attestation storage
    pub storage: StorageConfig,

    /// Attribute name -> value served to requesting subjects
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Verification policy
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// UDP address to bind
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Human-readable name used in log lines
    #[serde(default = "default_peer_name")]
    pub peer_name: String,
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database holding received attestations and their keys
    pub database_path: PathBuf,
}

/// Verification policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Answer verification requests from any peer
    #[serde(default)]
    pub allow: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_peer_name() -> String {
    "zkattest".to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

impl NodeConfig {
    /// Create a configuration storing attestations at `database_path`
    pub fn new(database_path: PathBuf) -> Self {
        Self {
            node: NodeSection {
                bind_address: default_bind_address(),
                peer_name: default_peer_name(),
            },
            protocol: CommunityConfig::default(),
            storage: StorageConfig { database_path },
            attributes: BTreeMap::new(),
            verification: VerificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: NodeConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        config
            .protocol
            .validate()
            .map_err(|e| format!("Invalid [protocol] in '{}': {}", path.display(), e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

        Ok(())
    }

    /// Parsed listen address
    pub fn bind_address(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        self.node
            .bind_address
            .parse()
            .map_err(|e| format!("Invalid bind_address '{}': {}", self.node.bind_address, e).into())
    }

    /// Attribute values as bytes (`hex:` prefix for binary values)
    pub fn attribute_values(&self) -> Result<BTreeMap<String, Vec<u8>>, Box<dyn std::error::Error>> {
        self.attributes
            .iter()
            .map(|(name, raw)| -> Result<(String, Vec<u8>), Box<dyn std::error::Error>> {
                let value = match raw.strip_prefix(HEX_PREFIX) {
                    Some(encoded) => hex::decode(encoded)
                        .map_err(|e| format!("Attribute '{}' is not valid hex: {}", name, e))?,
                    None => raw.as_bytes().to_vec(),
                };
                Ok((name.clone(), value))
            })
            .collect()
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml(database_path: &Path) -> String {
        format!(
            r#"# zkattest Node Configuration

[node]
# UDP address to listen on
bind_address = "{bind_address}"

# Name used in log lines
peer_name = "zkattest"

[protocol]
# Bytes per attestation chunk (max 1200)
chunk_size = 800

# Challenges in flight per verification
max_outstanding_challenges = 10

# Honesty probe chance out of 256 (0 disables)
honesty_check_threshold = 38

# Session lifetimes
request_timeout = "1m"
challenge_timeout = "10s"
sweep_interval = "1s"

[storage]
# SQLite database holding received attestations and their secret keys
database_path = "{database_path}"

[attributes]
# Values certified when a subject requests the attribute.
# Plain strings are sent as UTF-8; prefix with "hex:" for raw bytes.
# age = "hex:2a"

[verification]
# Allow peers to verify attestations held by this node
allow = false

[logging]
# Log level: trace, debug, info, warn, error (RUST_LOG takes precedence)
level = "info"

# Log file path (optional, logs to stderr if not specified)
# file = "/var/log/zkattest/node.log"
"#,
            bind_address = DEFAULT_BIND_ADDRESS,
            database_path = database_path.display()
        )
    }

    /// Create and save a default configuration file
    pub fn create_default(
        config_path: &Path,
        database_path: &Path,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let contents = Self::generate_default_toml(database_path);

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(config_path, contents).map_err(|e| {
            format!(
                "Failed to write config file '{}': {}",
                config_path.display(),
                e
            )
        })?;

        Ok(())
    }
}

/// Node data directory (`~/.local/share/zkattest` on Linux)
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("zkattest")
}

/// Default config file path
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

/// Default attestation database path
pub fn default_database_path() -> PathBuf {
    default_data_dir().join("attestations.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let database_path = PathBuf::from("/data/zkattest/attestations.db");
        let config = NodeConfig::new(database_path.clone());

        assert_eq!(config.storage.database_path, database_path);
        assert_eq!(config.node.bind_address, "0.0.0.0:8090");
        assert_eq!(config.logging.level, "info");
        assert!(!config.verification.allow);
        assert!(config.bind_address().is_ok());
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = NodeConfig::new(PathBuf::from("/data/attestations.db"));
        config.attributes.insert("age".to_string(), "hex:2a".to_string());
        config.verification.allow = true;
        config.save(&config_path).unwrap();

        let loaded = NodeConfig::load(&config_path).unwrap();
        assert_eq!(loaded.storage.database_path, config.storage.database_path);
        assert_eq!(loaded.attributes.get("age").map(String::as_str), Some("hex:2a"));
        assert!(loaded.verification.allow);
        assert_eq!(loaded.protocol, CommunityConfig::default());
    }

    #[test]
    fn test_create_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");
        let database_path = temp_dir.path().join("attestations.db");

        NodeConfig::create_default(&config_path, &database_path).unwrap();
        assert!(config_path.exists());

        let loaded = NodeConfig::load(&config_path).unwrap();
        assert_eq!(loaded.storage.database_path, database_path);
        assert_eq!(loaded.protocol.chunk_size, 800);
        assert_eq!(loaded.protocol.request_timeout, Duration::from_secs(60));
        assert!(loaded.attributes.is_empty());
    }

    #[test]
    fn test_attribute_values() {
        let mut config = NodeConfig::new(PathBuf::from("db"));
        config.attributes.insert("age".to_string(), "hex:2a".to_string());
        config.attributes.insert("name".to_string(), "alice".to_string());

        let values = config.attribute_values().unwrap();
        assert_eq!(values["age"], vec![0x2A]);
        assert_eq!(values["name"], b"alice".to_vec());

        config.attributes.insert("bad".to_string(), "hex:zz".to_string());
        assert!(config.attribute_values().is_err());
    }

    #[test]
    fn test_invalid_protocol_rejected_on_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[node]
bind_address = "127.0.0.1:9000"

[protocol]
chunk_size = 5000

[storage]
database_path = "db"
"#,
        )
        .unwrap();

        let err = NodeConfig::load(&config_path).unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
[node]

[storage]
database_path = "db"
"#,
        )
        .unwrap();

        assert_eq!(config.node.peer_name, "zkattest");
        assert_eq!(config.protocol.max_outstanding_challenges, 10);
        assert_eq!(config.logging.level, "info");
    }
}
