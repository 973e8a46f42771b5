//! Error types for devconf.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceId;

/// Main error type for devconf operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration language errors
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// Device transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Driver RPC errors
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// Driver registry / gateway errors
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Translation errors
    #[error("Translation error: {0}")]
    Translate(#[from] TranslateError),

    /// Engine configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A driver could not open a session to its device
    #[error("Failed to connect to device {device}: {source}")]
    DeviceConnection {
        device: DeviceId,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// True when the error reports an operation the transport does not support.
    pub fn is_not_implemented(&self) -> bool {
        match self {
            Error::Transport(TransportError::NotImplemented(_)) => true,
            Error::Rpc(RpcError::Remote(fault)) => fault.code == RpcFault::NOT_IMPLEMENTED,
            _ => false,
        }
    }
}

/// Lexical and grammar errors from the configuration compiler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A character outside the token alphabet
    #[error("invalid character {character:?} in '{fragment}' at line {line}, column {column}")]
    Lexical {
        character: char,
        fragment: String,
        line: usize,
        column: usize,
    },

    /// A token that cannot start or continue a statement
    #[error("unexpected '{fragment}' at line {line}, column {column}: expected {expected}")]
    Unexpected {
        fragment: String,
        expected: &'static str,
        line: usize,
        column: usize,
    },

    /// Input ended in the middle of a statement
    #[error("incomplete statement '{fragment}': expected {expected}")]
    Incomplete {
        fragment: String,
        expected: &'static str,
    },

    /// Operations could not be rendered as JSON
    #[error("failed to encode operations: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for CompileError {
    fn from(err: serde_json::Error) -> Self {
        CompileError::Encode(err.to_string())
    }
}

/// Transport layer errors (dial, authentication, device I/O).
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport does not support this operation
    #[error("{0} not implemented")]
    NotImplemented(String),

    /// No transport with this name exists
    #[error("Unrecognised transport: {0}")]
    UnknownTransport(String),

    /// The location string could not be parsed
    #[error("Invalid location '{location}': {reason}")]
    InvalidLocation { location: String, reason: String },

    /// Dial was attempted without a credential source
    #[error("Missing credential function, can't continue")]
    MissingCredentials,

    /// Failed to connect to the device
    #[error("Connection failed to {location}: {source}")]
    ConnectionFailed {
        location: String,
        #[source]
        source: io::Error,
    },

    /// Operation on a transport that has not been dialed
    #[error("Transport not connected - call dial() first")]
    NotConnected,

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// Host key does not match known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// Host not in known_hosts under strict verification
    #[error("Host key for {host}:{port} is unknown")]
    HostKeyUnknown { host: String, port: u16 },

    /// Reading or writing known_hosts failed
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Remote command exited with a non-zero status
    #[error("Remote command exited with status {status}")]
    CommandFailed { status: u32 },

    /// Remote command ended without reporting an exit status
    #[error("Remote command did not exit normally: {0}")]
    CommandAborted(String),

    /// FTP protocol error
    #[error("FTP error: {0}")]
    Ftp(String),

    /// Serial port error
    #[error("Serial error: {0}")]
    Serial(String),

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    pub(crate) fn not_implemented(op: &str) -> Self {
        TransportError::NotImplemented(op.to_string())
    }
}

/// Fault returned by the remote end of an RPC call.
///
/// This is the error body carried on the wire, so it is deliberately
/// language-neutral: a numeric code and a message.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct RpcFault {
    pub code: i32,
    pub message: String,
}

impl RpcFault {
    pub const INTERNAL: i32 = -32603;
    pub const UNKNOWN_METHOD: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const ALREADY_REGISTERED: i32 = 1;
    pub const NOT_FOUND: i32 = 2;
    pub const NOT_IMPLEMENTED: i32 = 3;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, message)
    }
}

impl From<Error> for RpcFault {
    fn from(err: Error) -> Self {
        // Faults from further down the chain pass through untouched.
        if let Error::Rpc(RpcError::Remote(fault)) = err {
            return fault;
        }
        let code = match &err {
            Error::Gateway(GatewayError::AlreadyRegistered { .. }) => RpcFault::ALREADY_REGISTERED,
            Error::Gateway(GatewayError::UnknownDevice(_))
            | Error::Gateway(GatewayError::MetaNotFound { .. }) => RpcFault::NOT_FOUND,
            e if e.is_not_implemented() => RpcFault::NOT_IMPLEMENTED,
            _ => RpcFault::INTERNAL,
        };
        RpcFault::new(code, err.to_string())
    }
}

/// RPC layer errors (framing, connection, remote faults).
#[derive(Error, Debug)]
pub enum RpcError {
    /// Failed to connect to a peer socket
    #[error("Failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The connection closed while calls were outstanding
    #[error("Connection disconnected")]
    Disconnected,

    /// The call did not complete in time
    #[error("Call '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// The peer answered with a fault
    #[error("Remote fault: {0}")]
    Remote(RpcFault),

    /// A frame could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// I/O error on the socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Driver registry and gateway errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The gateway socket already exists
    #[error("Can not start, socket {0} already exists")]
    AlreadyRunning(PathBuf),

    /// The gateway socket could not be bound
    #[error("Failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The gateway answered a registration with a refusal
    #[error("Gateway refused registration of '{name}'")]
    RegistrationRefused { name: String },

    /// A live registration exists for the driver name
    #[error("Driver '{name}' already registered")]
    AlreadyRegistered { name: String },

    /// The driver socket vanished; the registration was purged
    #[error("Driver socket {path} is gone")]
    StaleSocket { path: PathBuf },

    /// The driver's connection died; it must register again
    #[error("Lost connection to driver '{name}'")]
    DriverLost { name: String },

    /// No driver is registered under the name
    #[error("No driver registered under '{name}'")]
    NoDriver { name: String },

    /// The device is not in the inventory
    #[error("Unknown device {0}")]
    UnknownDevice(DeviceId),

    /// The metadata store has no value for the key
    #[error("No metadata '{key}' for device '{device}'")]
    MetaNotFound { device: String, key: String },

    /// The metadata store or audit log failed
    #[error("Store error: {0}")]
    Store(String),
}

/// Per-operation translation errors.
#[derive(Error, Debug)]
pub enum TranslateError {
    /// Service state is neither on nor off
    #[error("Unknown service state '{0}'")]
    UnknownServiceState(String),

    /// The driver refused to apply a command sequence
    #[error("Driver '{driver}' rejected the configuration")]
    Rejected { driver: String },

    /// The driver answered for a different device
    #[error("Driver returned commands for device {got}, expected {expected}")]
    DeviceMismatch { expected: DeviceId, got: DeviceId },
}

/// Engine configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The config file is not valid TOML for the engine schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value failed validation
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },
}

/// Result type alias using devconf's Error.
pub type Result<T> = std::result::Result<T, Error>;
