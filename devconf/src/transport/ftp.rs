//! FTP transport.
//!
//! `dial` only records the target. Every other operation opens its own
//! control connection, logs in, does its work and quits, so no idle FTP
//! session is ever held open. The blocking suppaftp client runs on
//! tokio's blocking pool.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use secrecy::ExposeSecret;
use suppaftp::FtpStream;
use suppaftp::types::FileType;

use super::config::{CredentialFn, host_port};
use super::relay::{Duplex, RelaySummary};
use super::{ClientTransport, DEFAULT_DIAL_TIMEOUT};
use crate::device::DeviceId;
use crate::error::{Result, TransportError};

const DEFAULT_PORT: u16 = 21;

/// FTP client transport.
pub struct Ftp {
    caller: String,
    timeout: Duration,
    credentials: Option<CredentialFn>,
    target: Option<(DeviceId, String)>,
}

/// Pseudo-commands understood by [`Ftp::read`](ClientTransport::read).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Query {
    List,
    Pwd,
}

impl Query {
    fn parse(buf: &[u8]) -> Option<Self> {
        let text = buf
            .iter()
            .position(|&b| b == 0)
            .map_or(buf, |nul| &buf[..nul]);
        match text.trim_ascii() {
            b"list" => Some(Query::List),
            b"pwd" => Some(Query::Pwd),
            _ => None,
        }
    }
}

impl Ftp {
    pub fn new(caller: &str) -> Self {
        Self {
            caller: caller.to_string(),
            timeout: DEFAULT_DIAL_TIMEOUT,
            credentials: None,
            target: None,
        }
    }

    /// Run `op` inside a fresh logged-in session.
    async fn session<T, F>(&self, what: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream) -> suppaftp::FtpResult<T> + Send + 'static,
    {
        let (id, location) = self.target.clone().ok_or(TransportError::NotConnected)?;
        let source = self
            .credentials
            .clone()
            .ok_or(TransportError::MissingCredentials)?;
        let creds = source.credentials(id).await?;
        let (host, port) = host_port(&location, DEFAULT_PORT)?;
        debug!("{}:ftp: {what} on {host}:{port}", self.caller);

        let task = tokio::task::spawn_blocking(move || -> suppaftp::FtpResult<T> {
            let mut ftp = FtpStream::connect((host.as_str(), port))?;
            ftp.login(creds.username.as_str(), creds.password.expose_secret())?;
            let out = op(&mut ftp);
            let _ = ftp.quit();
            out
        });

        tokio::time::timeout(self.timeout, task)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|e| TransportError::Ftp(e.to_string()))?
            .map_err(|e| TransportError::Ftp(e.to_string()).into())
    }
}

#[async_trait]
impl ClientTransport for Ftp {
    fn name(&self) -> &'static str {
        "ftp"
    }

    async fn dial(&mut self, id: DeviceId, location: &str) -> Result<()> {
        // Validate now; connect per operation.
        host_port(location, DEFAULT_PORT)?;
        info!("{}:ftp: target for device {id} is {location}", self.caller);
        self.target = Some((id, location.to_string()));
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let query = Query::parse(buf)
            .ok_or_else(|| TransportError::not_implemented("Read of this command"))?;

        let text = match query {
            Query::Pwd => self.session("pwd", |ftp| ftp.pwd()).await?,
            Query::List => self
                .session("list", |ftp| ftp.list(None))
                .await?
                .join("\n"),
        };

        let n = text.len().min(buf.len());
        buf[..n].copy_from_slice(&text.as_bytes()[..n]);
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let end = memchr::memchr(0, buf).unwrap_or(buf.len());
        let dir = String::from_utf8_lossy(&buf[..end]).trim().to_string();
        self.session("cwd", move |ftp| ftp.cwd(&dir)).await?;
        // Nothing is transferred to the device.
        Ok(0)
    }

    async fn send_file(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let name = name.to_string();
        let data = data.to_vec();
        self.session("stor", move |ftp| {
            ftp.transfer_type(FileType::Binary)?;
            ftp.put_file(&name, &mut Cursor::new(data))?;
            Ok(())
        })
        .await
    }

    async fn recv_file(&mut self, name: &str) -> Result<Vec<u8>> {
        let name = name.to_string();
        self.session("retr", move |ftp| {
            ftp.transfer_type(FileType::Binary)?;
            Ok(ftp.retr_as_buffer(&name)?.into_inner())
        })
        .await
    }

    async fn interact(&mut self, _caller: &mut dyn Duplex) -> Result<RelaySummary> {
        Err(TransportError::not_implemented("Interact").into())
    }

    fn set_credential_fn(&mut self, source: CredentialFn) {
        self.credentials = Some(source);
    }

    fn internal_auth(&self) -> bool {
        true
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    async fn close(&mut self) -> Result<()> {
        self.target = None;
        Ok(())
    }
}
