//! Collaborators the engine consults but does not own: the device
//! inventory, the per-device metadata store and the configuration audit
//! log.
//!
//! Deployments back these with their own database and versioning system.
//! The in-memory implementations here serve the standalone engine binary
//! and tests.

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use indexmap::IndexMap;
use log::debug;
use tokio::sync::RwLock;

use crate::device::{DeviceId, DeviceRecord};
use crate::error::{GatewayError, Result};

/// Author recorded on artifacts produced by translation.
pub const TRANSLATION_AUTHOR: &str = "Translation Engine";

/// Commit message recorded with raw configuration artifacts.
pub const RAW_CONFIG_MESSAGE: &str = "Translation Engine Raw Config Update";

/// File name of the raw command artifact.
pub const RAW_CONFIG_FILE: &str = "config.raw";

/// Maps device ids to inventory records.
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn device(&self, id: DeviceId) -> Result<DeviceRecord>;
}

/// Per-device key/value metadata, keyed by logical device name.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_meta(&self, device: &str, key: &str) -> Result<String>;

    /// Store a new version of `key`.
    async fn save_meta(&self, device: &str, key: &str, value: &str) -> Result<()>;
}

/// A set of files versioned together for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigArtifact {
    pub device: String,
    pub files: IndexMap<String, Vec<u8>>,
    pub author: String,
    pub message: String,
    pub when: SystemTime,
}

impl ConfigArtifact {
    /// The raw command artifact produced by a translation run.
    pub fn raw(device: impl Into<String>, raw: impl Into<Vec<u8>>) -> Self {
        let mut files = IndexMap::new();
        files.insert(RAW_CONFIG_FILE.to_string(), raw.into());
        Self {
            device: device.into(),
            files,
            author: TRANSLATION_AUTHOR.to_string(),
            message: RAW_CONFIG_MESSAGE.to_string(),
            when: SystemTime::now(),
        }
    }
}

/// Receives configuration artifacts for auditing and versioning.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, artifact: ConfigArtifact) -> Result<()>;
}

/// Inventory held in memory.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    devices: RwLock<HashMap<DeviceId, DeviceRecord>>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: DeviceRecord) {
        self.devices.write().await.insert(record.id, record);
    }
}

#[async_trait]
impl Inventory for MemoryInventory {
    async fn device(&self, id: DeviceId) -> Result<DeviceRecord> {
        self.devices
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownDevice(id).into())
    }
}

/// Metadata store and audit log held in memory. Every saved value is
/// kept, newest last.
#[derive(Debug, Default)]
pub struct MemoryStore {
    meta: RwLock<HashMap<(String, String), Vec<String>>>,
    artifacts: RwLock<Vec<ConfigArtifact>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every value saved for `key`, oldest first.
    pub async fn history(&self, device: &str, key: &str) -> Vec<String> {
        self.meta
            .read()
            .await
            .get(&(device.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Recorded artifacts, oldest first.
    pub async fn artifacts(&self) -> Vec<ConfigArtifact> {
        self.artifacts.read().await.clone()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get_meta(&self, device: &str, key: &str) -> Result<String> {
        self.meta
            .read()
            .await
            .get(&(device.to_string(), key.to_string()))
            .and_then(|versions| versions.last().cloned())
            .ok_or_else(|| {
                GatewayError::MetaNotFound {
                    device: device.to_string(),
                    key: key.to_string(),
                }
                .into()
            })
    }

    async fn save_meta(&self, device: &str, key: &str, value: &str) -> Result<()> {
        debug!("meta: new version of {device}/{key}");
        self.meta
            .write()
            .await
            .entry((device.to_string(), key.to_string()))
            .or_default()
            .push(value.to_string());
        Ok(())
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn record(&self, artifact: ConfigArtifact) -> Result<()> {
        debug!(
            "audit: {} file(s) for {} ({})",
            artifact.files.len(),
            artifact.device,
            artifact.message
        );
        self.artifacts.write().await.push(artifact);
        Ok(())
    }
}
