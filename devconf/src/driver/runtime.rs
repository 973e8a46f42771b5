//! Driver process lifecycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use super::dispatch::DriverHandler;
use super::engine::EngineClient;
use super::{DriverContext, DriverService};
use crate::config::{DEFAULT_RPC_TIMEOUT, DEFAULT_SOCKET_DIR, TranslationConfig};
use crate::error::{GatewayError, Result, RpcError};
use crate::rpc;
use crate::transport::DEFAULT_DIAL_TIMEOUT;

/// Runs a [`DriverService`] as a driver process.
///
/// On [`run`](Self::run) the runtime:
///
/// 1. connects to `engine.sock` in the socket directory,
/// 2. binds `<name>.sock` next to it and starts serving,
/// 3. registers with the gateway,
/// 4. serves until SIGINT/SIGTERM or until the gateway goes away,
/// 5. removes its socket.
///
/// Losing the gateway ends the run with [`RpcError::Disconnected`]; the
/// process supervisor is expected to restart the driver, which then
/// registers afresh.
pub struct DriverRuntime<S> {
    service: Arc<S>,
    socket_dir: PathBuf,
    rpc_timeout: Duration,
    dial_timeout: Duration,
}

impl<S: DriverService> DriverRuntime<S> {
    pub fn new(service: S) -> Self {
        Self {
            service: Arc::new(service),
            socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }

    /// Take the socket directory and timeouts from the `[translation]`
    /// section.
    pub fn from_config(service: S, config: &TranslationConfig) -> Self {
        Self::new(service)
            .socket_dir(&config.socket_dir)
            .rpc_timeout(config.rpc_timeout())
            .dial_timeout(config.dial_timeout())
    }

    /// Directory holding `engine.sock` and the driver's own socket.
    pub fn socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    /// Per-call timeout on the gateway connection.
    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Timeout for dialing devices.
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// `<socket_dir>/<name>.sock`.
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(format!("{}.sock", self.service.name()))
    }

    /// Run until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            crate::signal::shutdown_signal().await;
            trigger.cancel();
        });
        self.run_until(shutdown).await
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<()> {
        let name = self.service.name().to_string();
        let engine = EngineClient::connect(&self.socket_dir, self.rpc_timeout).await?;

        let socket = self.socket_path();
        clear_socket(&socket).await?;
        let listener = UnixListener::bind(&socket).map_err(|source| GatewayError::Bind {
            path: socket.clone(),
            source,
        })?;
        let _socket_file = SocketFile(socket.clone());
        info!("Driver '{}' listening on {}", name, socket.display());

        let ctx = DriverContext::new(engine.clone(), name.clone(), self.dial_timeout);
        let handler = Arc::new(DriverHandler::new(self.service.clone(), ctx));
        let local = shutdown.child_token();
        let serving = tokio::spawn(rpc::serve(listener, handler, local.clone()));

        if let Err(e) = engine.register(&name, &socket).await {
            local.cancel();
            let _ = serving.await;
            return Err(e);
        }
        info!("Driver '{}' registered", name);

        let outcome = tokio::select! {
            _ = local.cancelled() => Ok(()),
            _ = engine.closed() => {
                warn!("Driver '{}' lost the gateway connection", name);
                Err(RpcError::Disconnected.into())
            }
        };

        local.cancel();
        let _ = serving.await;
        engine.close();
        info!("Driver '{}' stopped", name);
        outcome
    }
}

/// Remove a socket file left by a previous run. A socket that still
/// accepts connections belongs to a running instance.
async fn clear_socket(socket: &Path) -> Result<()> {
    if tokio::fs::symlink_metadata(socket).await.is_err() {
        return Ok(());
    }
    if UnixStream::connect(socket).await.is_ok() {
        return Err(GatewayError::AlreadyRunning(socket.to_path_buf()).into());
    }
    warn!("Removing stale socket {}", socket.display());
    tokio::fs::remove_file(socket)
        .await
        .map_err(|source| GatewayError::Bind {
            path: socket.to_path_buf(),
            source,
        })?;
    Ok(())
}

/// Removes the socket file when dropped.
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => info!("Removed {}", self.0.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {e}", self.0.display()),
        }
    }
}
