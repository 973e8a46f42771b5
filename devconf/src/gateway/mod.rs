//! Driver gateway.
//!
//! The gateway listens on a well-known socket (`engine.sock` in the socket
//! directory). Driver processes connect to it, register the socket they
//! serve on, and read or update device metadata through it. The registry
//! it maintains is what the translation coordinator routes through.
//!
//! ```text
//!  driver ──Register/GetMeta/SaveMeta──▶ engine.sock ─┐
//!                                                     │ Registry
//!  coordinator ──Translate*/ExecuteConfig──▶ <driver>.sock
//! ```

pub mod registry;
pub mod service;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, Result};
use crate::rpc;
use crate::store::{Inventory, MetadataStore};

pub use registry::{DriverRegistration, Registry, driver_name_from_socket};
pub use service::EngineService;

/// File name of the gateway socket inside the socket directory.
pub const ENGINE_SOCKET: &str = "engine.sock";

/// Path of the gateway socket in `socket_dir`.
pub fn engine_socket(socket_dir: &Path) -> PathBuf {
    socket_dir.join(ENGINE_SOCKET)
}

/// A running gateway. Dropping it stops the accept loop and removes the
/// socket file.
pub struct Gateway {
    socket: PathBuf,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Gateway {
    /// Bind `engine.sock` in `socket_dir` and start serving.
    ///
    /// Fails with [`GatewayError::AlreadyRunning`] if the socket file
    /// exists.
    pub async fn bind(
        socket_dir: &Path,
        rpc_timeout: Duration,
        inventory: Arc<dyn Inventory>,
        meta: Arc<dyn MetadataStore>,
    ) -> Result<Self> {
        let socket = engine_socket(socket_dir);
        if tokio::fs::symlink_metadata(&socket).await.is_ok() {
            return Err(GatewayError::AlreadyRunning(socket).into());
        }

        let bind_err = |source| GatewayError::Bind {
            path: socket.clone(),
            source,
        };
        tokio::fs::create_dir_all(socket_dir).await.map_err(bind_err)?;
        let listener = UnixListener::bind(&socket).map_err(bind_err)?;
        if let Err(e) = std::fs::set_permissions(&socket, std::fs::Permissions::from_mode(0o660)) {
            warn!("Failed to set permissions on {}: {e}", socket.display());
        }
        info!("Gateway listening on {}", socket.display());

        let registry = Arc::new(Registry::new(rpc_timeout));
        let service = Arc::new(EngineService::new(registry.clone(), inventory, meta));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(rpc::serve(listener, service, shutdown.clone()));

        Ok(Self {
            socket,
            registry,
            shutdown,
            task: Some(task),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Serve until SIGINT or SIGTERM, then shut down.
    pub async fn run_until_signal(self) {
        crate::signal::shutdown_signal().await;
        self.shutdown().await;
    }

    /// Stop serving, drop every driver connection and remove the socket.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.registry.clear();
        self.remove_socket();
    }

    fn remove_socket(&self) {
        match std::fs::remove_file(&self.socket) {
            Ok(()) => info!("Removed {}", self.socket.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {e}", self.socket.display()),
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.shutdown.cancel();
            self.remove_socket();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::store::{MemoryInventory, MemoryStore};

    fn stores() -> (Arc<MemoryInventory>, Arc<MemoryStore>) {
        (Arc::new(MemoryInventory::new()), Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_refuses_existing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let (inv, store) = stores();
        let gw = Gateway::bind(dir.path(), Duration::from_secs(1), inv.clone(), store.clone())
            .await
            .unwrap();
        assert!(gw.socket_path().exists());

        let err = Gateway::bind(dir.path(), Duration::from_secs(1), inv, store)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Gateway(GatewayError::AlreadyRunning(_))));

        let path = gw.socket_path().to_path_buf();
        gw.shutdown().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_socket() {
        let dir = tempfile::tempdir().unwrap();
        let (inv, store) = stores();
        let gw = Gateway::bind(dir.path(), Duration::from_secs(1), inv, store)
            .await
            .unwrap();
        let path = gw.socket_path().to_path_buf();
        drop(gw);
        assert!(!path.exists());
    }
}
