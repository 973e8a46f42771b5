//! Methods the gateway serves to drivers.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use super::registry::Registry;
use crate::error::{Result, RpcFault};
use crate::rpc::server::{self, Handler};
use crate::rpc::{BoolReply, KvPair, KvRequest, RegRequest, method};
use crate::store::{Inventory, MetadataStore};

/// `Register`, `GetMeta` and `SaveMeta`.
pub struct EngineService {
    registry: Arc<Registry>,
    inventory: Arc<dyn Inventory>,
    meta: Arc<dyn MetadataStore>,
}

impl EngineService {
    pub fn new(
        registry: Arc<Registry>,
        inventory: Arc<dyn Inventory>,
        meta: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            registry,
            inventory,
            meta,
        }
    }

    pub async fn register(&self, req: RegRequest) -> Result<BoolReply> {
        self.registry.register(&req.name, &req.socket).await?;
        Ok(BoolReply { ok: true })
    }

    pub async fn get_meta(&self, req: KvRequest) -> Result<KvPair> {
        let device = self.inventory.device(req.device_id).await?;
        debug!("GetMeta {} for {}", req.key, device.name);
        let value = self.meta.get_meta(&device.name, &req.key).await?;
        Ok(KvPair {
            device_id: req.device_id,
            key: req.key,
            value,
        })
    }

    pub async fn save_meta(&self, req: KvPair) -> Result<BoolReply> {
        let device = self.inventory.device(req.device_id).await?;
        debug!("SaveMeta {} for {}", req.key, device.name);
        self.meta
            .save_meta(&device.name, &req.key, &req.value)
            .await?;
        Ok(BoolReply { ok: true })
    }
}

#[async_trait]
impl Handler for EngineService {
    async fn handle(&self, method: &str, params: Value) -> std::result::Result<Value, RpcFault> {
        match method {
            method::REGISTER => {
                let req = server::params(method, params)?;
                server::reply(&self.register(req).await?)
            }
            method::GET_META => {
                let req = server::params(method, params)?;
                server::reply(&self.get_meta(req).await?)
            }
            method::SAVE_META => {
                let req = server::params(method, params)?;
                server::reply(&self.save_meta(req).await?)
            }
            other => Err(server::unknown_method(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::device::DeviceRecord;
    use crate::store::{MemoryInventory, MemoryStore};
    use serde_json::json;

    async fn service() -> (EngineService, Arc<MemoryStore>) {
        let inventory = Arc::new(MemoryInventory::new());
        inventory.insert(DeviceRecord::new(1, "relay-a")).await;
        let store = Arc::new(MemoryStore::new());
        store.save_meta("relay-a", "username", "admin").await.unwrap();
        let svc = EngineService::new(
            Arc::new(Registry::new(Duration::from_secs(1))),
            inventory,
            store.clone(),
        );
        (svc, store)
    }

    #[tokio::test]
    async fn test_get_meta_resolves_device_name() {
        let (svc, _) = service().await;
        let v = svc
            .handle(method::GET_META, json!({"device_id": 1, "key": "username"}))
            .await
            .unwrap();
        assert_eq!(v, json!({"device_id": 1, "key": "username", "value": "admin"}));
    }

    #[tokio::test]
    async fn test_get_meta_faults() {
        let (svc, _) = service().await;
        let fault = svc
            .handle(method::GET_META, json!({"device_id": 2, "key": "username"}))
            .await
            .unwrap_err();
        assert_eq!(fault.code, RpcFault::NOT_FOUND);

        let fault = svc
            .handle(method::GET_META, json!({"device_id": 1, "key": "enable"}))
            .await
            .unwrap_err();
        assert_eq!(fault.code, RpcFault::NOT_FOUND);

        let fault = svc
            .handle(method::GET_META, json!({"key": "username"}))
            .await
            .unwrap_err();
        assert_eq!(fault.code, RpcFault::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_save_meta() {
        let (svc, store) = service().await;
        let v = svc
            .handle(
                method::SAVE_META,
                json!({"device_id": 1, "key": "password", "value": "rotated"}),
            )
            .await
            .unwrap();
        assert_eq!(v, json!({"ok": true}));
        assert_eq!(store.get_meta("relay-a", "password").await.unwrap(), "rotated");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (svc, _) = service().await;
        let fault = svc.handle("Shutdown", Value::Null).await.unwrap_err();
        assert_eq!(fault.code, RpcFault::UNKNOWN_METHOD);
    }
}
