//! Placeholder transport that supports nothing.

use async_trait::async_trait;

use super::config::CredentialFn;
use super::relay::{Duplex, RelaySummary};
use super::ClientTransport;
use crate::device::DeviceId;
use crate::error::{Result, TransportError};

/// Transport for devices without a usable transport. Every operation
/// fails immediately with "not implemented"; `close` succeeds.
#[derive(Debug, Default)]
pub struct NullTransport;

impl NullTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ClientTransport for NullTransport {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn dial(&mut self, _id: DeviceId, _location: &str) -> Result<()> {
        Err(TransportError::not_implemented("Dial").into())
    }

    async fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(TransportError::not_implemented("Read").into())
    }

    async fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(TransportError::not_implemented("Write").into())
    }

    async fn send_file(&mut self, _name: &str, _data: &[u8]) -> Result<()> {
        Err(TransportError::not_implemented("SendFile").into())
    }

    async fn recv_file(&mut self, _name: &str) -> Result<Vec<u8>> {
        Err(TransportError::not_implemented("RecvFile").into())
    }

    async fn interact(&mut self, _caller: &mut dyn Duplex) -> Result<RelaySummary> {
        Err(TransportError::not_implemented("Interact").into())
    }

    fn set_credential_fn(&mut self, _source: CredentialFn) {}

    fn internal_auth(&self) -> bool {
        false
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_everything_not_implemented() {
        let mut t = NullTransport::new();
        let mut buf = [0u8; 4];

        assert!(t.dial(DeviceId(1), "anywhere").await.unwrap_err().is_not_implemented());
        assert!(t.read(&mut buf).await.unwrap_err().is_not_implemented());
        assert!(t.write(b"x").await.unwrap_err().is_not_implemented());
        assert!(t.send_file("f", b"x").await.unwrap_err().is_not_implemented());
        assert!(t.recv_file("f").await.unwrap_err().is_not_implemented());

        let (mut caller, _peer) = tokio::io::duplex(8);
        assert!(t.interact(&mut caller).await.unwrap_err().is_not_implemented());

        t.close().await.unwrap();
    }
}
