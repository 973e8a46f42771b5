//! Uniform device I/O over telnet, SSH, FTP and serial lines.
//!
//! Every protocol client implements [`ClientTransport`]. Drivers pick one
//! by name with [`get_transport`], dial it, and then talk to the device
//! through the same handful of calls regardless of whether the protocol
//! is a byte stream (telnet, serial), command/response (SSH) or file
//! oriented (FTP). Operations a protocol has no equivalent for fail with
//! [`TransportError::NotImplemented`](crate::error::TransportError::NotImplemented).
//!
//! A transport instance is owned by the caller that dialed it and is not
//! shared between concurrent operations.
//!
//! # Example
//!
//! ```rust,no_run
//! use devconf::device::DeviceId;
//! use devconf::transport;
//!
//! # async fn demo() -> devconf::Result<()> {
//! let mut t = transport::get_transport("telnet", "linux")?;
//! t.dial(DeviceId(4), "10.0.0.5").await?;
//!
//! t.write(b"show version\r\n").await?;
//! let mut buf = [0u8; 1024];
//! let n = t.read(&mut buf).await?;
//! println!("{}", String::from_utf8_lossy(&buf[..n]));
//!
//! t.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod ftp;
mod null;
pub mod relay;
mod serial;
mod ssh;
mod telnet;

use std::time::Duration;

use async_trait::async_trait;

use crate::device::DeviceId;
use crate::error::Result;

pub use config::{
    CredentialFn, CredentialSource, Credentials, HostKeyVerification, StaticCredentials,
    TransportKind,
};
pub use ftp::Ftp;
pub use null::NullTransport;
pub use relay::{Duplex, RelaySummary, relay};
pub use serial::Serial;
pub use ssh::Ssh;
pub use telnet::{Telnet, TelnetStream};

/// Dial timeout used until a caller sets its own.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Protocol client for one device session.
#[async_trait]
pub trait ClientTransport: Send {
    /// Protocol name, for logging.
    fn name(&self) -> &'static str;

    /// Connect to the device at `location`.
    async fn dial(&mut self, id: DeviceId, location: &str) -> Result<()>;

    /// Read from the device into `buf`, returning the byte count.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf` to the device, returning the byte count.
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Store `data` on the device under `name`.
    async fn send_file(&mut self, name: &str, data: &[u8]) -> Result<()>;

    /// Fetch the file `name` from the device.
    async fn recv_file(&mut self, name: &str) -> Result<Vec<u8>>;

    /// Relay raw bytes between the device and `caller` until either side
    /// closes.
    async fn interact(&mut self, caller: &mut dyn Duplex) -> Result<RelaySummary>;

    /// Install the credential source consulted on dial.
    fn set_credential_fn(&mut self, source: CredentialFn);

    /// True when the transport logs in on its own using the credential
    /// source; false when authentication travels in-band.
    fn internal_auth(&self) -> bool;

    /// Override the dial timeout.
    fn set_timeout(&mut self, _timeout: Duration) {}

    /// Tear down the session.
    async fn close(&mut self) -> Result<()>;
}

/// Build an undialed transport by protocol name.
///
/// `caller` names the driver using the transport and prefixes its log
/// lines.
pub fn get_transport(kind: &str, caller: &str) -> Result<Box<dyn ClientTransport>> {
    let transport: Box<dyn ClientTransport> = match kind.parse::<TransportKind>()? {
        TransportKind::Telnet => Box::new(Telnet::new(caller)),
        TransportKind::Ssh => Box::new(Ssh::new(caller)),
        TransportKind::Ftp => Box::new(Ftp::new(caller)),
        TransportKind::Serial => Box::new(Serial::new(caller)),
    };
    Ok(transport)
}
