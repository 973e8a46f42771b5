//! Serial line transport.

use async_trait::async_trait;
use log::{debug, info};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use super::config::CredentialFn;
use super::relay::{Duplex, RelaySummary, relay};
use super::ClientTransport;
use crate::device::DeviceId;
use crate::error::{Result, TransportError};

/// Serial client transport. Locations are `device:baud`, e.g.
/// `/dev/ttyUSB0:9600`; the line is always 8N1.
pub struct Serial {
    caller: String,
    port: Option<SerialStream>,
}

impl Serial {
    pub fn new(caller: &str) -> Self {
        Self {
            caller: caller.to_string(),
            port: None,
        }
    }

    fn port(&mut self) -> Result<&mut SerialStream> {
        Ok(self.port.as_mut().ok_or(TransportError::NotConnected)?)
    }
}

/// Split `device:baud` at the last colon.
fn parse_location(location: &str) -> Result<(&str, u32)> {
    let invalid = |reason: &str| TransportError::InvalidLocation {
        location: location.to_string(),
        reason: reason.to_string(),
    };

    let (path, baud) = location
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected device:baud"))?;
    if path.is_empty() {
        return Err(invalid("missing device").into());
    }
    let baud = baud
        .parse::<u32>()
        .ok()
        .filter(|&b| b > 0)
        .ok_or_else(|| invalid("baud rate is not a positive number"))?;
    Ok((path, baud))
}

#[async_trait]
impl ClientTransport for Serial {
    fn name(&self) -> &'static str {
        "serial"
    }

    async fn dial(&mut self, id: DeviceId, location: &str) -> Result<()> {
        let (path, baud) = parse_location(location)?;
        info!("{}:serial: opening {path} at {baud} baud for device {id}", self.caller);

        let port = tokio_serial::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open_native_async()
            .map_err(|e| TransportError::Serial(format!("{path}: {e}")))?;

        self.port = Some(port);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.port()?.read(buf).await.map_err(TransportError::Io)?;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.port()?.write(buf).await.map_err(TransportError::Io)?;
        Ok(n)
    }

    async fn send_file(&mut self, _name: &str, _data: &[u8]) -> Result<()> {
        Err(TransportError::not_implemented("SendFile").into())
    }

    async fn recv_file(&mut self, _name: &str) -> Result<Vec<u8>> {
        Err(TransportError::not_implemented("RecvFile").into())
    }

    async fn interact(&mut self, caller: &mut dyn Duplex) -> Result<RelaySummary> {
        let port = self.port()?;
        Ok(relay(port, caller).await)
    }

    fn set_credential_fn(&mut self, _source: CredentialFn) {}

    fn internal_auth(&self) -> bool {
        false
    }

    async fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!("{}:serial: closed", self.caller);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        assert_eq!(parse_location("/dev/ttyUSB0:9600").unwrap(), ("/dev/ttyUSB0", 9600));
        assert_eq!(parse_location("COM3:115200").unwrap(), ("COM3", 115200));
    }

    #[test]
    fn test_parse_location_invalid() {
        assert!(parse_location("/dev/ttyS0").is_err());
        assert!(parse_location("/dev/ttyS0:fast").is_err());
        assert!(parse_location("/dev/ttyS0:0").is_err());
        assert!(parse_location(":9600").is_err());
    }

    #[tokio::test]
    async fn test_missing_device_fails_dial() {
        let mut t = Serial::new("test");
        let err = t
            .dial(DeviceId(9), "/dev/devconf-no-such-tty:9600")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Transport(TransportError::Serial(_))
        ));
        assert!(t.send_file("a", b"").await.unwrap_err().is_not_implemented());
    }
}
