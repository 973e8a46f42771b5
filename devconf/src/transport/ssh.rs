//! SSH transport using russh.
//!
//! SSH is used command/response style: `read` and `write` each run one
//! remote command on a fresh exec channel over the dialed session, and
//! `interact` opens a PTY shell for passthrough.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use russh::client::{self, Handle};
use russh::keys::PublicKey;
use russh::{ChannelMsg, Disconnect};
use secrecy::ExposeSecret;

use super::config::{CredentialFn, HostKeyVerification, host_port};
use super::relay::{Duplex, RelaySummary, relay};
use super::{ClientTransport, DEFAULT_DIAL_TIMEOUT};
use crate::device::DeviceId;
use crate::error::{Result, TransportError};

const DEFAULT_PORT: u16 = 22;
const TERMINAL_WIDTH: u32 = 80;
const TERMINAL_HEIGHT: u32 = 24;

/// SSH client transport.
pub struct Ssh {
    caller: String,
    timeout: Duration,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    credentials: Option<CredentialFn>,
    session: Option<Handle<SshHandler>>,
}

impl Ssh {
    pub fn new(caller: &str) -> Self {
        Self {
            caller: caller.to_string(),
            timeout: DEFAULT_DIAL_TIMEOUT,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            credentials: None,
            session: None,
        }
    }

    /// Set host key verification mode.
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Use a custom known_hosts file instead of `~/.ssh/known_hosts`.
    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Run `command` on its own exec channel and collect stdout and stderr
    /// in arrival order along with how the command ended.
    async fn run(&self, command: &str) -> Result<(Vec<u8>, Exit)> {
        let session = self.session.as_ref().ok_or(TransportError::NotConnected)?;
        debug!("{}:ssh: exec {:?}", self.caller, command);

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .exec(true, command)
            .await
            .map_err(TransportError::Ssh)?;

        let mut output = Vec::new();
        let mut exit = Exit::Unknown;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => exit = Exit::Status(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    exit = Exit::Signal(format!("{signal_name:?}"))
                }
                _ => {}
            }
        }

        Ok((output, exit))
    }
}

/// How a remote command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Exit {
    Status(u32),
    Signal(String),
    /// The channel closed without an exit status.
    Unknown,
}

impl Exit {
    fn check(self) -> Result<()> {
        match self {
            Exit::Status(0) => Ok(()),
            Exit::Status(status) => Err(TransportError::CommandFailed { status }.into()),
            Exit::Signal(signal) => {
                Err(TransportError::CommandAborted(format!("killed by signal {signal}")).into())
            }
            Exit::Unknown => {
                Err(TransportError::CommandAborted("channel closed without exit status".into()).into())
            }
        }
    }
}

/// Command text carried in a caller buffer: everything before the first
/// NUL. Callers leave zeroed room after the command for the output.
fn command_text(buf: &[u8]) -> String {
    let end = memchr::memchr(0, buf).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[async_trait]
impl ClientTransport for Ssh {
    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn dial(&mut self, id: DeviceId, location: &str) -> Result<()> {
        let source = self
            .credentials
            .clone()
            .ok_or(TransportError::MissingCredentials)?;
        let creds = source.credentials(id).await?;
        let (host, port) = host_port(location, DEFAULT_PORT)?;
        info!("{}:ssh: dialing device {id} at {host}:{port}", self.caller);

        let ssh_config = Arc::new(client::Config::default());
        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));
        let handler = SshHandler {
            host: host.clone(),
            port,
            host_key_verification: self.host_key_verification.clone(),
            known_hosts_path: self.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        let mut session = tokio::time::timeout(
            self.timeout,
            client::connect(ssh_config, (host.as_str(), port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.timeout))?
        .map_err(|e| {
            // Prefer the detailed host key error over russh's generic one.
            match host_key_error.lock().ok().and_then(|mut slot| slot.take()) {
                Some(hk_err) => hk_err,
                None => TransportError::Ssh(e),
            }
        })?;

        let success = session
            .authenticate_password(&creds.username, creds.password.expose_secret())
            .await
            .map_err(TransportError::Ssh)?
            .success();
        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: creds.username,
            }
            .into());
        }

        self.session = Some(session);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let command = command_text(buf);
        let (output, exit) = self.run(&command).await?;

        let n = output.len().min(buf.len());
        buf[..n].copy_from_slice(&output[..n]);
        if n < output.len() {
            debug!(
                "{}:ssh: output truncated from {} to {} bytes",
                self.caller,
                output.len(),
                n
            );
        }

        exit.check()?;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let command = command_text(buf);
        let (_, exit) = self.run(&command).await?;
        exit.check()?;
        Ok(0)
    }

    async fn send_file(&mut self, _name: &str, _data: &[u8]) -> Result<()> {
        Err(TransportError::not_implemented("SendFile").into())
    }

    async fn recv_file(&mut self, _name: &str) -> Result<Vec<u8>> {
        Err(TransportError::not_implemented("RecvFile").into())
    }

    async fn interact(&mut self, caller: &mut dyn Duplex) -> Result<RelaySummary> {
        let session = self.session.as_ref().ok_or(TransportError::NotConnected)?;

        let channel = session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .request_pty(true, "xterm", TERMINAL_WIDTH, TERMINAL_HEIGHT, 0, 0, &[])
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .request_shell(true)
            .await
            .map_err(TransportError::Ssh)?;

        Ok(relay(channel.into_stream(), caller).await)
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
        if let Some(session) = self.session.take() {
            debug!("{}:ssh: disconnecting", self.caller);
            session
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
                .map_err(TransportError::Ssh)?;
        }
        Ok(())
    }
}

/// russh client handler that checks host keys against known_hosts.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Detailed host key failure for `dial` to report instead of
    /// russh::Error::UnknownKey.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    /// `Ok(true)` if matched, `Ok(false)` if the host is not listed.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> std::result::Result<bool, TransportError> {
        let result = match self.known_hosts_path {
            Some(ref path) => russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, pubkey),
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    fn learn_host_key(&self, pubkey: &PublicKey) -> std::result::Result<(), TransportError> {
        let result = match self.known_hosts_path {
            Some(ref path) => {
                russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
            }
            None => russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey),
        };
        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, err: TransportError) -> bool {
        if let Ok(mut slot) = self.host_key_error.lock() {
            *slot = Some(err);
        }
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let accepted = match self.host_key_verification {
            HostKeyVerification::Disabled => true,
            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => true,
                Ok(false) => {
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key: {}", e);
                    }
                    true
                }
                Err(e) => self.reject(e),
            },
            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => true,
                Ok(false) => self.reject(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                }),
                Err(e) => self.reject(e),
            },
        };
        Ok(accepted)
    }
}
