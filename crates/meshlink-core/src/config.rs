//! Node configuration
//!
//! Loaded from a TOML file. Every field has a default, so an empty file
//! (or no file) yields a working node on the public default channel.
//!
//! ```toml
//! address = "!bba88770"
//! short_name = "BC"
//! long_name = "Base Camp"
//! hardware_model = 43
//! channel_name = "LongFast"
//! psk = "1PG7OiApB1nwvP+rz05pAQ=="
//! store_path = "nodes.json"
//!
//! [timing]
//! retry_interval_secs = 5
//! announce_interval_secs = 3600
//! ```

use crate::error::{ConfigError, KeyError, StoreError};
use crate::mesh::crypto::{ChannelKey, DEFAULT_CHANNEL_NAME, DEFAULT_PSK_BASE64};
use crate::mesh::envelope::NodeInfoPayload;
use crate::mesh::packet::{NodeId, DEFAULT_HOP_LIMIT};
use crate::mesh::scheduler::SchedulerConfig;
use crate::mesh::store::{JsonFileStore, MemoryStore, NodeStore};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Identity, channel and timing of the local node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Mesh address; a random one is chosen when absent
    pub address: Option<String>,
    pub short_name: String,
    pub long_name: String,
    /// HardwareModel enumeration value announced in NodeInfo
    pub hardware_model: i32,
    /// Colon-separated hex, e.g. `"aa:bb:cc:dd:ee:ff"`
    pub mac_address: Option<String>,
    /// Base64
    pub public_key: Option<String>,
    pub channel_name: String,
    /// Base64 pre-shared key
    pub psk: String,
    /// JSON node store; in-memory when absent
    pub store_path: Option<PathBuf>,
    pub timing: TimingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: None,
            short_name: "MESH".to_string(),
            long_name: "meshlink node".to_string(),
            hardware_model: 0,
            mac_address: None,
            public_key: None,
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            psk: DEFAULT_PSK_BASE64.to_string(),
            store_path: None,
            timing: TimingConfig::default(),
        }
    }
}

/// `[timing]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub hop_limit: u8,
    pub retry_interval_secs: u64,
    pub ack_lookback_secs: u64,
    pub announce_interval_secs: u64,
    pub origin_retries: u8,
    pub forward_retries: u8,
    pub rx_timeout_ms: u64,
    pub dedup_ttl_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            hop_limit: DEFAULT_HOP_LIMIT,
            retry_interval_secs: 5,
            ack_lookback_secs: 30,
            announce_interval_secs: 3600,
            origin_retries: 3,
            forward_retries: 2,
            rx_timeout_ms: 1000,
            dedup_ttl_secs: 600,
        }
    }
}

impl TimingConfig {
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            retry_interval: Duration::from_secs(self.retry_interval_secs),
            ack_lookback: Duration::from_secs(self.ack_lookback_secs),
            announce_interval: Duration::from_secs(self.announce_interval_secs),
            origin_retries: self.origin_retries,
            forward_retries: self.forward_retries,
            seen_ttl: Duration::from_secs(self.dedup_ttl_secs),
        }
    }

    pub fn rx_timeout(&self) -> Duration {
        Duration::from_millis(self.rx_timeout_ms)
    }
}

impl NodeConfig {
    /// Read and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded node config");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every field that is parsed lazily
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.address()?;
        self.key().map_err(|e| invalid("psk", e))?;
        self.mac_bytes()?;
        self.public_key_bytes()?;
        if self.timing.hop_limit > 7 {
            return Err(ConfigError::Invalid {
                field: "timing.hop_limit",
                reason: format!("{} does not fit in 3 bits", self.timing.hop_limit),
            });
        }
        if self.timing.origin_retries == 0 {
            return Err(invalid("timing.origin_retries", "must be at least 1"));
        }
        if self.timing.forward_retries == 0 {
            return Err(invalid("timing.forward_retries", "must be at least 1"));
        }
        Ok(())
    }

    /// Configured mesh address, if any
    pub fn address(&self) -> Result<Option<NodeId>, ConfigError> {
        self.address
            .as_deref()
            .map(|s| s.parse::<NodeId>().map_err(|e| invalid("address", e)))
            .transpose()
    }

    /// Configured address, or a fresh random one
    pub fn resolve_address(&self) -> Result<NodeId, ConfigError> {
        Ok(self.address()?.unwrap_or_else(NodeId::random))
    }

    /// Store named by `store_path`, in memory when unset
    pub fn open_store(&self) -> Result<Box<dyn NodeStore>, StoreError> {
        match &self.store_path {
            Some(path) => Ok(Box::new(JsonFileStore::open(path)?)),
            None => Ok(Box::new(MemoryStore::new())),
        }
    }

    pub fn key(&self) -> Result<ChannelKey, KeyError> {
        ChannelKey::from_base64(&self.psk)
    }

    pub fn mac_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        let Some(mac) = self.mac_address.as_deref() else {
            return Ok(Vec::new());
        };
        let bytes = mac
            .split(':')
            .map(|part| u8::from_str_radix(part, 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|e| invalid("mac_address", e))?;
        if bytes.len() != 6 {
            return Err(invalid("mac_address", format!("expected 6 octets, got {}", bytes.len())));
        }
        Ok(bytes)
    }

    pub fn public_key_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        match self.public_key.as_deref() {
            None => Ok(Vec::new()),
            Some(key) => STANDARD.decode(key.trim()).map_err(|e| invalid("public_key", e)),
        }
    }

    /// Identity announced by this node as `address`
    pub fn node_info(&self, address: NodeId) -> Result<NodeInfoPayload, ConfigError> {
        Ok(NodeInfoPayload {
            id: address.to_string(),
            long_name: self.long_name.clone(),
            short_name: self.short_name.clone(),
            mac_address: self.mac_bytes()?,
            hardware_model: self.hardware_model,
            public_key: self.public_key_bytes()?,
        })
    }
}

fn invalid(field: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.key().unwrap(), ChannelKey::default());
        assert_eq!(config.timing.scheduler(), SchedulerConfig::default());
        assert_eq!(config.timing.rx_timeout(), Duration::from_millis(1000));
        assert!(config.address().unwrap().is_none());
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            address = "!bba88770"
            short_name = "BC"
            long_name = "Base Camp"
            hardware_model = 43
            mac_address = "aa:bb:cc:dd:ee:ff"
            psk = "AQ=="

            [timing]
            retry_interval_secs = 2
            forward_retries = 1
        "#;
        let config = NodeConfig::from_toml_str(text).unwrap();
        assert_eq!(config.address().unwrap(), Some(NodeId::from_u32(0xbba88770)));
        assert_eq!(config.mac_bytes().unwrap(), vec![0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(config.key().unwrap(), ChannelKey::default());
        assert_eq!(config.timing.retry_interval_secs, 2);
        assert_eq!(config.timing.forward_retries, 1);
        assert_eq!(config.timing.origin_retries, 3);

        let info = config.node_info(NodeId::from_u32(0xbba88770)).unwrap();
        assert_eq!(info.id, "!bba88770");
        assert_eq!(info.hardware_model, 43);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = NodeConfig::from_toml_str("address = \"!xyz\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "address", .. }));

        let err = NodeConfig::from_toml_str("psk = \"AAAA\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "psk", .. }));

        let err = NodeConfig::from_toml_str("mac_address = \"aa:bb\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "mac_address", .. }));

        let err = NodeConfig::from_toml_str("[timing]\nhop_limit = 9").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "timing.hop_limit", .. }));

        let err = NodeConfig::from_toml_str("[timing]\nforward_retries = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "timing.forward_retries", .. }));

        assert!(matches!(NodeConfig::from_toml_str("psk = ["), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_store_path_selects_json_store() {
        let path = std::env::temp_dir().join(format!("meshlink-config-store-{}.json", std::process::id()));
        let record = crate::mesh::directory::NodeRecord::new(NodeId::from_u32(0x42));

        let config = NodeConfig {
            store_path: Some(path.clone()),
            ..NodeConfig::default()
        };
        config.open_store().unwrap().upsert(&record).unwrap();
        let reopened = config.open_store().unwrap().load_all().unwrap();
        assert_eq!(reopened, vec![record]);

        assert!(NodeConfig::default().open_store().unwrap().load_all().unwrap().is_empty());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = NodeConfig::default();
        config.address = Some("!00000001".into());
        let text = config.to_toml_string().unwrap();
        assert_eq!(NodeConfig::from_toml_str(&text).unwrap(), config);
    }
}
