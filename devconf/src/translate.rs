//! Translation coordinator.
//!
//! Turns configuration text for one device into that device's command
//! sequence by asking the device's driver to translate each operation,
//! then records the result and optionally has the driver apply it.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::compiler::{self, Operation};
use crate::device::{DeviceId, DeviceRecord};
use crate::error::{Result, TranslateError};
use crate::gateway::Registry;
use crate::rpc::{
    BoolReply, CommandSeq, ConfigFiles, DeviceRef, RpcClient, Service, ServiceConfig, UserPass,
    Var, method,
};
use crate::store::{AuditLog, ConfigArtifact, Inventory, MetadataStore};

/// Metadata key naming the driver responsible for a device.
pub const DRIVER_META_KEY: &str = "driver";

/// Map a service state word to on/off. Only the lowercase and uppercase
/// spellings are accepted.
pub fn service_state(state: &str) -> Result<bool> {
    match state {
        "on" | "ON" => Ok(true),
        "off" | "OFF" => Ok(false),
        other => Err(TranslateError::UnknownServiceState(other.to_string()).into()),
    }
}

/// The driver a device is routed to.
struct Route {
    device: DeviceRecord,
    driver: String,
    client: RpcClient,
}

/// Coordinates translation between the compiler, the drivers and the
/// audit log.
pub struct Coordinator {
    registry: Arc<Registry>,
    inventory: Arc<dyn Inventory>,
    meta: Arc<dyn MetadataStore>,
    audit: Arc<dyn AuditLog>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<Registry>,
        inventory: Arc<dyn Inventory>,
        meta: Arc<dyn MetadataStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            registry,
            inventory,
            meta,
            audit,
        }
    }

    async fn route(&self, id: DeviceId) -> Result<Route> {
        let device = self.inventory.device(id).await?;
        let driver = self.meta.get_meta(&device.name, DRIVER_META_KEY).await?;
        let client = self.registry.client_for(&driver).await?;
        debug!("device {} ({}) routed to driver '{}'", id, device.name, driver);
        Ok(Route {
            device,
            driver,
            client,
        })
    }

    /// Translate `text` into the command sequence for device `id`.
    ///
    /// A compile or routing failure fails the whole call. A failed
    /// translation of one operation is logged and that operation is
    /// skipped. The resulting commands are recorded as the device's raw
    /// configuration before they are returned.
    pub async fn configure(&self, id: DeviceId, text: &str) -> Result<CommandSeq> {
        let ops = compiler::parse(text)?;
        let route = self.route(id).await?;
        self.build(id, &route, &ops).await
    }

    async fn build(&self, id: DeviceId, route: &Route, ops: &[Operation]) -> Result<CommandSeq> {
        let mut seq = CommandSeq::new(id);
        for op in ops {
            match translate_one(&route.client, id, op).await {
                Ok(part) => seq.commands.extend(part.commands),
                Err(e) => warn!(
                    "Skipping {} for device {} ({}): {}",
                    op.kind(),
                    id,
                    route.device.name,
                    e
                ),
            }
        }

        self.audit
            .record(ConfigArtifact::raw(&route.device.name, seq.to_raw()))
            .await?;
        info!(
            "Translated {} statement(s) into {} command(s) for {}",
            ops.len(),
            seq.len(),
            route.device.name
        );
        Ok(seq)
    }

    /// Translate `text` and have the driver apply the whole sequence in
    /// one call. Driver errors are returned as they are; nothing is
    /// retried or rolled back.
    pub async fn execute_config(&self, id: DeviceId, text: &str) -> Result<CommandSeq> {
        let ops = compiler::parse(text)?;
        let route = self.route(id).await?;
        let seq = self.build(id, &route, &ops).await?;

        let reply: BoolReply = route.client.call(method::EXECUTE_CONFIG, &seq).await?;
        if !reply.ok {
            return Err(TranslateError::Rejected {
                driver: route.driver,
            }
            .into());
        }
        Ok(seq)
    }

    /// Fetch the configuration files currently on the device.
    pub async fn get_config(&self, id: DeviceId) -> Result<ConfigFiles> {
        let route = self.route(id).await?;
        Ok(route
            .client
            .call(method::GET_CONFIG, &DeviceRef { device_id: id })
            .await?)
    }
}

/// Issue the one translate call matching `op`.
async fn translate_one(client: &RpcClient, id: DeviceId, op: &Operation) -> Result<CommandSeq> {
    let seq: CommandSeq = match op {
        Operation::Service { name, state } => {
            let req = Service {
                device_id: id,
                name: name.clone(),
                state: service_state(state)?,
            };
            client.call(method::TRANSLATE_SERVICE, &req).await?
        }
        Operation::Password { username, password } => {
            let req = UserPass {
                device_id: id,
                username: username.clone(),
                password: password.clone(),
            };
            client.call(method::TRANSLATE_PASS, &req).await?
        }
        Operation::Variable { key, value } => {
            let req = Var {
                device_id: id,
                key: key.clone(),
                value: value.clone(),
            };
            client.call(method::TRANSLATE_VAR, &req).await?
        }
        Operation::ServiceOption {
            service,
            key,
            value,
        } => {
            let req = ServiceConfig {
                device_id: id,
                name: service.clone(),
                key: key.clone(),
                value: value.clone(),
            };
            client.call(method::TRANSLATE_SVC_CONFIG, &req).await?
        }
    };

    if seq.device_id != id {
        return Err(TranslateError::DeviceMismatch {
            expected: id,
            got: seq.device_id,
        }
        .into());
    }
    Ok(seq)
}
