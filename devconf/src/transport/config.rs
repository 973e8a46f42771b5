//! Transport selection, location strings and credentials.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::device::DeviceId;
use crate::error::{Result, TransportError};

/// Transport protocols a device can be reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Telnet,
    Ssh,
    Ftp,
    Serial,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Telnet => "telnet",
            TransportKind::Ssh => "ssh",
            TransportKind::Ftp => "ftp",
            TransportKind::Serial => "serial",
        }
    }

    /// Default TCP port, for network transports.
    pub fn default_port(self) -> Option<u16> {
        match self {
            TransportKind::Telnet => Some(23),
            TransportKind::Ssh => Some(22),
            TransportKind::Ftp => Some(21),
            TransportKind::Serial => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "telnet" => Ok(TransportKind::Telnet),
            "ssh" => Ok(TransportKind::Ssh),
            "ftp" => Ok(TransportKind::Ftp),
            "serial" => Ok(TransportKind::Serial),
            other => Err(TransportError::UnknownTransport(other.to_string())),
        }
    }
}

/// Host key verification mode for SSH, analogous to OpenSSH's
/// `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default)]
pub enum HostKeyVerification {
    /// Reject hosts not already in known_hosts.
    Strict,

    /// Accept and learn unknown keys, reject changed keys.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. For lab use only.
    Disabled,
}

/// Username/password pair handed to transports that authenticate.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Supplies credentials for a device when a transport dials it.
///
/// Drivers typically back this with the gateway's metadata store so a
/// rotated password is picked up on the next dial.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials(&self, id: DeviceId) -> Result<Credentials>;
}

/// Shared credential callback installed with `set_credential_fn`.
pub type CredentialFn = Arc<dyn CredentialSource>;

/// Fixed credentials for every device.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn credentials(&self, _id: DeviceId) -> Result<Credentials> {
        Ok(self.0.clone())
    }
}

/// Split `host[:port]`, applying the transport's default port.
pub(crate) fn host_port(location: &str, default_port: u16) -> Result<(String, u16)> {
    let invalid = |reason: &str| TransportError::InvalidLocation {
        location: location.to_string(),
        reason: reason.to_string(),
    };

    let location = location.trim();
    if location.is_empty() {
        return Err(invalid("empty location").into());
    }

    match location.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            if host.is_empty() {
                return Err(invalid("missing host").into());
            }
            let port = port.parse().map_err(|_| invalid("port is not a number"))?;
            Ok((host.to_string(), port))
        }
        // Bracketed IPv6 literal with a port.
        Some((host, port)) if host.starts_with('[') && host.ends_with(']') => {
            let port = port.parse().map_err(|_| invalid("port is not a number"))?;
            Ok((host[1..host.len() - 1].to_string(), port))
        }
        _ => {
            let host = location
                .strip_prefix('[')
                .and_then(|h| h.strip_suffix(']'))
                .unwrap_or(location);
            if host.is_empty() {
                return Err(invalid("missing host").into());
            }
            Ok((host.to_string(), default_port))
        }
    }
}
