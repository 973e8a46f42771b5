//! Driver registry: driver name to live RPC connection.
//!
//! The map is the gateway's only shared mutable state. Its mutex is held
//! for map reads and writes only, never across a dial or a call.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::rpc::RpcClient;

/// A registered driver.
#[derive(Debug, Clone)]
pub struct DriverRegistration {
    pub name: String,
    pub socket: PathBuf,
    pub client: RpcClient,
}

impl DriverRegistration {
    pub fn is_alive(&self) -> bool {
        self.client.is_alive()
    }
}

/// Registered drivers by name.
#[derive(Debug)]
pub struct Registry {
    drivers: Mutex<IndexMap<String, DriverRegistration>>,
    rpc_timeout: Duration,
}

/// Driver name implied by a socket path: the file name up to its first
/// dot, so `/var/run/devconf/linux.sock` names `linux`.
pub fn driver_name_from_socket(socket: &Path) -> Option<&str> {
    let file = socket.file_name()?.to_str()?;
    let name = file.split('.').next().unwrap_or(file);
    (!name.is_empty()).then_some(name)
}

impl Registry {
    pub fn new(rpc_timeout: Duration) -> Self {
        Self {
            drivers: Mutex::new(IndexMap::new()),
            rpc_timeout,
        }
    }

    fn drivers(&self) -> MutexGuard<'_, IndexMap<String, DriverRegistration>> {
        self.drivers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `name` as served on `socket`.
    ///
    /// Rejected while a live registration for `name` exists. A dead one is
    /// purged first. The dial happens outside the lock; the insert
    /// re-checks in case a concurrent registration won the race.
    pub async fn register(&self, name: &str, socket: &Path) -> Result<()> {
        debug!("Registering {} at {}", name, socket.display());
        self.check_free(name)?;

        let client = self.dial(socket).await?;

        let mut drivers = self.drivers();
        if drivers.get(name).is_some_and(DriverRegistration::is_alive) {
            client.close();
            return Err(GatewayError::AlreadyRegistered {
                name: name.to_string(),
            }
            .into());
        }
        drivers.insert(
            name.to_string(),
            DriverRegistration {
                name: name.to_string(),
                socket: socket.to_path_buf(),
                client,
            },
        );
        info!("Driver '{}' registered at {}", name, socket.display());
        Ok(())
    }

    fn check_free(&self, name: &str) -> Result<()> {
        let mut drivers = self.drivers();
        match drivers.get(name) {
            Some(reg) if reg.is_alive() => Err(GatewayError::AlreadyRegistered {
                name: name.to_string(),
            }
            .into()),
            Some(_) => {
                info!("Purging dead registration of '{}'", name);
                drivers.shift_remove(name);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Connect to a driver socket.
    ///
    /// If the socket file is gone the driver has exited: the registration
    /// named by the socket file is purged, provided it was made for this
    /// same socket, and the dial fails. The driver can then register again
    /// from scratch once it restarts.
    pub async fn dial(&self, socket: &Path) -> Result<RpcClient> {
        if tokio::fs::metadata(socket).await.is_ok() {
            return Ok(RpcClient::connect(socket, self.rpc_timeout).await?);
        }

        if let Some(name) = driver_name_from_socket(socket) {
            if self.purge_if(name, |reg| reg.socket == socket) {
                warn!("Socket {} is gone, purged driver '{}'", socket.display(), name);
            }
        }
        Err(GatewayError::StaleSocket {
            path: socket.to_path_buf(),
        }
        .into())
    }

    /// Connection to the driver registered as `name`.
    ///
    /// A registration whose connection has died is purged, never re-dialed:
    /// the restarted driver has to register again. The error is
    /// `StaleSocket` when the socket file is gone too.
    pub async fn client_for(&self, name: &str) -> Result<RpcClient> {
        let reg = self
            .drivers()
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NoDriver {
                name: name.to_string(),
            })?;
        if reg.is_alive() {
            return Ok(reg.client);
        }

        debug!("Connection to '{}' lost", name);
        // A re-registration may already have replaced the dead entry.
        if !self.purge_if(name, |current| !current.is_alive()) {
            if let Some(current) = self.get(name) {
                return Ok(current.client);
            }
        }
        if tokio::fs::metadata(&reg.socket).await.is_err() {
            return Err(GatewayError::StaleSocket { path: reg.socket }.into());
        }
        Err(GatewayError::DriverLost {
            name: name.to_string(),
        }
        .into())
    }

    /// Drop the registration for `name`, closing its connection. Returns
    /// whether one existed.
    pub fn purge(&self, name: &str) -> bool {
        self.purge_if(name, |_| true)
    }

    /// Drop the registration for `name` only if `pred` holds for it.
    fn purge_if(&self, name: &str, pred: impl FnOnce(&DriverRegistration) -> bool) -> bool {
        let mut drivers = self.drivers();
        if !drivers.get(name).is_some_and(pred) {
            return false;
        }
        match drivers.shift_remove(name) {
            Some(reg) => {
                reg.client.close();
                true
            }
            None => false,
        }
    }

    /// Registered driver names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.drivers().keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<DriverRegistration> {
        self.drivers().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.drivers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers().is_empty()
    }

    /// Close every connection and empty the registry.
    pub fn clear(&self) {
        for (_, reg) in self.drivers().drain(..) {
            reg.client.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use tokio::net::UnixListener;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_driver_name_from_socket() {
        assert_eq!(
            driver_name_from_socket(Path::new("/var/run/devconf/linux.sock")),
            Some("linux")
        );
        assert_eq!(driver_name_from_socket(Path::new("sel421.v2.sock")), Some("sel421"));
        assert_eq!(driver_name_from_socket(Path::new("plain")), Some("plain"));
        assert_eq!(driver_name_from_socket(Path::new("/")), None);
        assert_eq!(driver_name_from_socket(Path::new(".hidden")), None);
    }

    /// Listener that accepts and holds connections until dropped.
    fn listen(path: &Path) -> tokio::task::JoinHandle<()> {
        let listener = UnixListener::bind(path).unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        })
    }

    #[tokio::test]
    async fn test_duplicate_live_registration_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("linux.sock");
        let _server = listen(&sock);
        let registry = Registry::new(TIMEOUT);

        registry.register("linux", &sock).await.unwrap();
        let err = registry.register("linux", &sock).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Gateway(GatewayError::AlreadyRegistered { ref name }) if name == "linux"
        ));
        assert_eq!(registry.names(), ["linux"]);
    }

    #[tokio::test]
    async fn test_dead_registration_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("linux.sock");
        let server = listen(&sock);
        let registry = Registry::new(TIMEOUT);
        registry.register("linux", &sock).await.unwrap();

        // The driver dies and restarts on the same path.
        server.abort();
        let _ = server.await;
        let old = registry.get("linux").unwrap().client;
        old.closed().await;
        std::fs::remove_file(&sock).unwrap();
        let _server = listen(&sock);

        registry.register("linux", &sock).await.unwrap();
        assert!(registry.get("linux").unwrap().is_alive());
    }

    #[tokio::test]
    async fn test_missing_socket_purges() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("sel421.sock");
        let server = listen(&sock);
        let registry = Registry::new(TIMEOUT);
        registry.register("sel421", &sock).await.unwrap();

        server.abort();
        let _ = server.await;
        std::fs::remove_file(&sock).unwrap();
        registry.get("sel421").unwrap().client.closed().await;

        let err = registry.client_for("sel421").await.unwrap_err();
        assert!(matches!(err, Error::Gateway(GatewayError::StaleSocket { .. })));
        assert!(registry.is_empty());

        let err = registry.client_for("sel421").await.unwrap_err();
        assert!(matches!(err, Error::Gateway(GatewayError::NoDriver { .. })));
    }

    #[tokio::test]
    async fn test_register_unreachable_socket() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(TIMEOUT);
        let err = registry
            .register("ghost", &dir.path().join("ghost.sock"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Gateway(GatewayError::StaleSocket { .. })));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_client_for_purges_dropped_connection() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("linux.sock");
        let _server = listen(&sock);
        let registry = Registry::new(TIMEOUT);
        registry.register("linux", &sock).await.unwrap();

        registry.get("linux").unwrap().client.close();
        let err = registry.client_for("linux").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Gateway(GatewayError::DriverLost { ref name }) if name == "linux"
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_restarted_driver_registers_after_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("linux.sock");
        let server = listen(&sock);
        let registry = Registry::new(TIMEOUT);
        registry.register("linux", &sock).await.unwrap();

        server.abort();
        let _ = server.await;
        registry.get("linux").unwrap().client.closed().await;
        std::fs::remove_file(&sock).unwrap();

        // The new process has bound its socket but not registered yet when
        // a lookup arrives.
        let _server = listen(&sock);
        let err = registry.client_for("linux").await.unwrap_err();
        assert!(matches!(err, Error::Gateway(GatewayError::DriverLost { .. })));
        assert!(registry.is_empty());

        registry.register("linux", &sock).await.unwrap();
        assert!(registry.client_for("linux").await.unwrap().is_alive());
    }

    #[tokio::test]
    async fn test_missing_foreign_socket_keeps_live_driver() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("sel421.sock");
        let _server = listen(&sock);
        let registry = Registry::new(TIMEOUT);
        registry.register("sel421", &sock).await.unwrap();

        let elsewhere = dir.path().join("other").join("sel421.sock");
        let err = registry.register("impostor", &elsewhere).await.unwrap_err();
        assert!(matches!(err, Error::Gateway(GatewayError::StaleSocket { .. })));
        assert_eq!(registry.names(), ["sel421"]);
        assert!(registry.get("sel421").unwrap().is_alive());
    }
}
