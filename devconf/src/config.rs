//! Engine configuration file.
//!
//! ```toml
//! [global]
//! log_level = "info"
//!
//! [translation]
//! socket_dir = "/var/run/devconf"
//! log_level = "debug"
//! rpc_timeout_secs = 30
//! dial_timeout_secs = 10
//!
//! [[devices]]
//! id = 4
//! name = "substation-rtu"
//! transport = "ssh"
//! location = "10.0.0.5"
//! driver = "linux"
//!
//! [devices.meta]
//! username = "root"
//! password = "changeme"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use log::LevelFilter;
use serde::Deserialize;

use crate::device::{DeviceId, DeviceRecord};
use crate::driver::{LOCATION_META_KEY, TRANSPORT_META_KEY};
use crate::error::{ConfigError, Result};
use crate::store::{MemoryInventory, MemoryStore, MetadataStore};
use crate::translate::DRIVER_META_KEY;
use crate::transport::TransportKind;

/// Socket directory used when none is configured.
pub const DEFAULT_SOCKET_DIR: &str = "/var/run/devconf";

/// Per-call RPC timeout used when none is configured.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default)]
    pub translation: TranslationConfig,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranslationConfig {
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    pub log_level: Option<String>,

    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,

    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            socket_dir: default_socket_dir(),
            log_level: None,
            rpc_timeout_secs: default_rpc_timeout_secs(),
            dial_timeout_secs: default_dial_timeout_secs(),
        }
    }
}

impl TranslationConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_DIR)
}

fn default_rpc_timeout_secs() -> u64 {
    DEFAULT_RPC_TIMEOUT.as_secs()
}

fn default_dial_timeout_secs() -> u64 {
    crate::transport::DEFAULT_DIAL_TIMEOUT.as_secs()
}

/// A device seeded into the standalone engine's inventory.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub id: i64,
    pub name: String,

    /// Shorthand for the `transport` meta key.
    pub transport: Option<String>,

    /// Shorthand for the `location` meta key.
    pub location: Option<String>,

    /// Shorthand for the `driver` meta key.
    pub driver: Option<String>,

    #[serde(default)]
    pub meta: IndexMap<String, String>,
}

impl DeviceConfig {
    /// Every metadata entry for the device, shorthands included.
    pub fn meta_entries(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .meta
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        for (key, value) in [
            (TRANSPORT_META_KEY, &self.transport),
            (LOCATION_META_KEY, &self.location),
            (DRIVER_META_KEY, &self.driver),
        ] {
            if let Some(value) = value {
                entries.push((key, value.as_str()));
            }
        }
        entries
    }
}

impl EngineConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |field: &str, reason: String| ConfigError::Validation {
            field: field.to_string(),
            reason,
        };

        if self.translation.socket_dir.as_os_str().is_empty() {
            return Err(invalid("translation.socket_dir", "must not be empty".into()).into());
        }
        if self.translation.rpc_timeout_secs == 0 {
            return Err(invalid("translation.rpc_timeout_secs", "must be positive".into()).into());
        }
        if self.translation.dial_timeout_secs == 0 {
            return Err(invalid("translation.dial_timeout_secs", "must be positive".into()).into());
        }
        for (field, level) in [
            ("global.log_level", &self.global.log_level),
            ("translation.log_level", &self.translation.log_level),
        ] {
            if let Some(level) = level {
                parse_level(level).map_err(|reason| invalid(field, reason))?;
            }
        }

        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.id) {
                return Err(invalid("devices.id", format!("duplicate id {}", device.id)).into());
            }
            if device.name.trim().is_empty() {
                return Err(invalid("devices.name", format!("empty name for id {}", device.id)).into());
            }
            if let Some(kind) = &device.transport {
                kind.parse::<TransportKind>().map_err(|_| {
                    invalid(
                        "devices.transport",
                        format!("unknown transport '{kind}' for {}", device.name),
                    )
                })?;
            }
        }
        Ok(())
    }

    /// Log level for the translation subsystem: `override_level` (from the
    /// command line) first, then `[translation]`, then `[global]`, then
    /// `info`.
    pub fn log_level(&self, override_level: Option<&str>) -> Result<LevelFilter> {
        let level = override_level
            .or(self.translation.log_level.as_deref())
            .or(self.global.log_level.as_deref());
        match level {
            Some(level) => parse_level(level).map_err(|reason| {
                ConfigError::Validation {
                    field: "log_level".to_string(),
                    reason,
                }
                .into()
            }),
            None => Ok(LevelFilter::Info),
        }
    }

    /// Build the in-memory inventory and metadata store from `[[devices]]`.
    pub async fn seed(&self) -> Result<(MemoryInventory, MemoryStore)> {
        let inventory = MemoryInventory::new();
        let store = MemoryStore::new();
        for device in &self.devices {
            inventory
                .insert(DeviceRecord::new(DeviceId(device.id), device.name.as_str()))
                .await;
            for (key, value) in device.meta_entries() {
                store.save_meta(&device.name, key, value).await?;
            }
        }
        Ok((inventory, store))
    }
}

fn parse_level(level: &str) -> std::result::Result<LevelFilter, String> {
    level
        .parse::<LevelFilter>()
        .map_err(|_| format!("unknown log level '{level}'"))
}

/// Install `env_logger` at `level`. `RUST_LOG`, when set, wins.
pub fn init_logging(level: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    let _ = builder.format_timestamp_millis().try_init();
}
