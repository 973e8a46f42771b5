//! # devconf
//!
//! Device configuration translation engine.
//!
//! devconf turns operator intent written in a small configuration
//! language into device-specific command sequences, and pushes them to
//! devices over whatever protocol the device speaks.
//!
//! ## Features
//!
//! - Configuration compiler (`SET`, `PASSWORD`, `SERVICE` statements)
//! - Driver gateway: drivers run as separate processes and plug in over a
//!   Unix socket with a small length-prefixed JSON RPC protocol
//! - Translation coordinator with best-effort, per-statement translation
//! - One transport contract over telnet, SSH, FTP and serial lines,
//!   including raw interactive passthrough
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use devconf::device::DeviceId;
//! use devconf::gateway::Gateway;
//! use devconf::store::{MemoryInventory, MemoryStore};
//! use devconf::translate::Coordinator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), devconf::Error> {
//!     let inventory = Arc::new(MemoryInventory::new());
//!     let store = Arc::new(MemoryStore::new());
//!     let gateway = Gateway::bind(
//!         "/var/run/devconf".as_ref(),
//!         Duration::from_secs(30),
//!         inventory.clone(),
//!         store.clone(),
//!     )
//!     .await?;
//!
//!     let coordinator = Coordinator::new(gateway.registry().clone(), inventory, store.clone(), store);
//!     let commands = coordinator
//!         .configure(DeviceId(4), "SERVICE ssh OFF\nPASSWORD root s3cret")
//!         .await?;
//!     for cmd in commands.iter() {
//!         println!("{cmd}");
//!     }
//!
//!     gateway.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod compiler;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod rpc;
pub mod signal;
pub mod store;
pub mod translate;
pub mod transport;

pub use compiler::Operation;
pub use config::EngineConfig;
pub use device::{DeviceId, DeviceRecord};
pub use driver::{DriverContext, DriverRuntime, DriverService};
pub use error::{Error, Result};
pub use gateway::Gateway;
pub use translate::Coordinator;
pub use transport::{ClientTransport, get_transport};
