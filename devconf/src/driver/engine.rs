//! A driver's connection to the gateway.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use crate::device::DeviceId;
use crate::error::{GatewayError, Result};
use crate::gateway::engine_socket;
use crate::rpc::{BoolReply, KvPair, KvRequest, RegRequest, RpcClient, method};
use crate::transport::{CredentialSource, Credentials};

/// Metadata key holding the device login name.
pub const USERNAME_META_KEY: &str = "username";

/// Metadata key holding the device password.
pub const PASSWORD_META_KEY: &str = "password";

/// Client for the gateway's `Register`, `GetMeta` and `SaveMeta` calls.
#[derive(Debug, Clone)]
pub struct EngineClient {
    rpc: RpcClient,
}

impl EngineClient {
    /// Connect to `engine.sock` in `socket_dir`.
    pub async fn connect(socket_dir: &Path, timeout: Duration) -> Result<Self> {
        let rpc = RpcClient::connect(engine_socket(socket_dir), timeout).await?;
        Ok(Self { rpc })
    }

    pub fn from_rpc(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    pub fn is_alive(&self) -> bool {
        self.rpc.is_alive()
    }

    /// Resolves once the gateway connection is gone.
    pub async fn closed(&self) {
        self.rpc.closed().await
    }

    pub fn close(&self) {
        self.rpc.close()
    }

    /// Register `name` as served on `socket`.
    pub async fn register(&self, name: &str, socket: &Path) -> Result<()> {
        let req = RegRequest {
            name: name.to_string(),
            socket: socket.to_path_buf(),
        };
        let reply: BoolReply = self.rpc.call(method::REGISTER, &req).await?;
        if !reply.ok {
            return Err(GatewayError::RegistrationRefused {
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    pub async fn get_meta(&self, device_id: DeviceId, key: &str) -> Result<String> {
        let req = KvRequest {
            device_id,
            key: key.to_string(),
        };
        let pair: KvPair = self.rpc.call(method::GET_META, &req).await?;
        Ok(pair.value)
    }

    /// Store a new version of `key` for the device.
    pub async fn save_meta(&self, device_id: DeviceId, key: &str, value: &str) -> Result<()> {
        debug!("SaveMeta {key} for device {device_id}");
        let req = KvPair {
            device_id,
            key: key.to_string(),
            value: value.to_string(),
        };
        let reply: BoolReply = self.rpc.call(method::SAVE_META, &req).await?;
        if !reply.ok {
            return Err(GatewayError::Store(format!(
                "SaveMeta {key} for device {device_id} refused"
            ))
            .into());
        }
        Ok(())
    }
}

/// Credentials come from the device's `username` and `password` metadata,
/// read fresh on every dial.
#[async_trait]
impl CredentialSource for EngineClient {
    async fn credentials(&self, id: DeviceId) -> Result<Credentials> {
        let username = self.get_meta(id, USERNAME_META_KEY).await?;
        let password = self.get_meta(id, PASSWORD_META_KEY).await?;
        Ok(Credentials::new(username, password))
    }
}
