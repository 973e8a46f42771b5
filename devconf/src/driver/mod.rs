//! Driver process runtime.
//!
//! A driver knows how to turn configuration operations into the command
//! language of one device family and how to push those commands to a
//! device. Implement [`DriverService`] and hand it to a
//! [`DriverRuntime`]: the runtime connects to the engine, serves the
//! driver's socket, registers it and runs until a shutdown signal.
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use devconf::driver::{DriverContext, DriverRuntime, DriverService};
//! use devconf::rpc::{BoolReply, CommandSeq, Service, ServiceConfig, UserPass, Var};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl DriverService for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     async fn translate_pass(&self, _: &DriverContext, req: UserPass) -> devconf::Result<CommandSeq> {
//!         Ok(CommandSeq::with_commands(req.device_id, [format!("passwd {}", req.username)]))
//!     }
//!
//!     async fn translate_service(&self, _: &DriverContext, req: Service) -> devconf::Result<CommandSeq> {
//!         Ok(CommandSeq::new(req.device_id))
//!     }
//!
//!     async fn translate_var(&self, _: &DriverContext, req: Var) -> devconf::Result<CommandSeq> {
//!         Ok(CommandSeq::new(req.device_id))
//!     }
//!
//!     async fn translate_svc_config(
//!         &self,
//!         _: &DriverContext,
//!         req: ServiceConfig,
//!     ) -> devconf::Result<CommandSeq> {
//!         Ok(CommandSeq::new(req.device_id))
//!     }
//!
//!     async fn execute_config(&self, _: &DriverContext, _: CommandSeq) -> devconf::Result<BoolReply> {
//!         Ok(true.into())
//!     }
//! }
//!
//! # async fn demo() -> devconf::Result<()> {
//! DriverRuntime::new(Echo).socket_dir("/var/run/devconf").run().await
//! # }
//! ```

pub mod connect;
mod dispatch;
pub mod engine;
mod runtime;

use std::time::Duration;

use async_trait::async_trait;

use crate::device::DeviceId;
use crate::error::{Result, TransportError};
use crate::rpc::{BoolReply, CommandSeq, ConfigFiles, DeviceRef, Service, ServiceConfig, UserPass, Var};
use crate::transport::ClientTransport;

pub use connect::{LOCATION_META_KEY, TRANSPORT_META_KEY, connect_to_device};
pub use dispatch::DriverHandler;
pub use engine::EngineClient;
pub use runtime::DriverRuntime;

/// What a driver's translate and execute calls can reach.
#[derive(Debug, Clone)]
pub struct DriverContext {
    engine: EngineClient,
    caller: String,
    dial_timeout: Duration,
}

impl DriverContext {
    pub fn new(engine: EngineClient, caller: impl Into<String>, dial_timeout: Duration) -> Self {
        Self {
            engine,
            caller: caller.into(),
            dial_timeout,
        }
    }

    /// The gateway connection, for metadata.
    pub fn engine(&self) -> &EngineClient {
        &self.engine
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    /// Dial device `id` using the transport named in its metadata.
    pub async fn connect(&self, id: DeviceId) -> Result<Box<dyn ClientTransport>> {
        connect_to_device(&self.engine, id, &self.caller, self.dial_timeout).await
    }
}

/// The calls a driver answers.
///
/// Translations return the commands for one operation and must carry the
/// request's `device_id`. `execute_config` applies a whole sequence.
#[async_trait]
pub trait DriverService: Send + Sync + 'static {
    /// Registration name. The driver serves on `<name>.sock`.
    fn name(&self) -> &str;

    async fn translate_pass(&self, ctx: &DriverContext, req: UserPass) -> Result<CommandSeq>;

    async fn translate_service(&self, ctx: &DriverContext, req: Service) -> Result<CommandSeq>;

    async fn translate_var(&self, ctx: &DriverContext, req: Var) -> Result<CommandSeq>;

    async fn translate_svc_config(
        &self,
        ctx: &DriverContext,
        req: ServiceConfig,
    ) -> Result<CommandSeq>;

    /// Apply `commands` to the device, in order.
    async fn execute_config(&self, ctx: &DriverContext, commands: CommandSeq)
    -> Result<BoolReply>;

    /// Fetch the device's current configuration files.
    async fn get_config(&self, _ctx: &DriverContext, _req: DeviceRef) -> Result<ConfigFiles> {
        Err(TransportError::not_implemented("GetConfig").into())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Driver that translates everything to nothing.
    pub(crate) struct Nop;

    #[async_trait]
    impl DriverService for Nop {
        fn name(&self) -> &str {
            "nop"
        }

        async fn translate_pass(&self, _: &DriverContext, req: UserPass) -> Result<CommandSeq> {
            Ok(CommandSeq::new(req.device_id))
        }

        async fn translate_service(&self, _: &DriverContext, req: Service) -> Result<CommandSeq> {
            Ok(CommandSeq::new(req.device_id))
        }

        async fn translate_var(&self, _: &DriverContext, req: Var) -> Result<CommandSeq> {
            Ok(CommandSeq::new(req.device_id))
        }

        async fn translate_svc_config(
            &self,
            _: &DriverContext,
            req: ServiceConfig,
        ) -> Result<CommandSeq> {
            Ok(CommandSeq::new(req.device_id))
        }

        async fn execute_config(&self, _: &DriverContext, _: CommandSeq) -> Result<BoolReply> {
            Ok(true.into())
        }
    }
}
