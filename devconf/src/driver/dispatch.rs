//! Maps RPC method names onto a [`DriverService`].

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;

use super::{DriverContext, DriverService};
use crate::error::RpcFault;
use crate::rpc::method;
use crate::rpc::server::{self, Handler};

/// RPC handler serving one driver.
pub struct DriverHandler<S> {
    service: Arc<S>,
    ctx: DriverContext,
}

impl<S: DriverService> DriverHandler<S> {
    pub fn new(service: Arc<S>, ctx: DriverContext) -> Self {
        Self { service, ctx }
    }
}

#[async_trait]
impl<S: DriverService> Handler for DriverHandler<S> {
    async fn handle(&self, method: &str, params: Value) -> Result<Value, RpcFault> {
        debug!("{}: {}", self.service.name(), method);
        let svc = &self.service;
        let ctx = &self.ctx;
        let result = match method {
            method::TRANSLATE_PASS => {
                let req = server::params(method, params)?;
                svc.translate_pass(ctx, req).await.map(|r| server::reply(&r))
            }
            method::TRANSLATE_SERVICE => {
                let req = server::params(method, params)?;
                svc.translate_service(ctx, req).await.map(|r| server::reply(&r))
            }
            method::TRANSLATE_VAR => {
                let req = server::params(method, params)?;
                svc.translate_var(ctx, req).await.map(|r| server::reply(&r))
            }
            method::TRANSLATE_SVC_CONFIG => {
                let req = server::params(method, params)?;
                svc.translate_svc_config(ctx, req)
                    .await
                    .map(|r| server::reply(&r))
            }
            method::EXECUTE_CONFIG => {
                let req = server::params(method, params)?;
                svc.execute_config(ctx, req).await.map(|r| server::reply(&r))
            }
            method::GET_CONFIG => {
                let req = server::params(method, params)?;
                svc.get_config(ctx, req).await.map(|r| server::reply(&r))
            }
            other => return Err(server::unknown_method(other)),
        };

        match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!("{}: {} failed: {}", self.service.name(), method, e);
                Err(e.into())
            }
        }
    }
}
