//! Request and reply bodies exchanged between the gateway, the
//! coordinator and driver processes.

use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::device::DeviceId;

/// Password change request for `TranslatePass`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPass {
    pub device_id: DeviceId,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for UserPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserPass")
            .field("device_id", &self.device_id)
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Service state change for `TranslateService`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub device_id: DeviceId,
    pub name: String,
    pub state: bool,
}

/// Device variable for `TranslateVar`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Var {
    pub device_id: DeviceId,
    pub key: String,
    pub value: String,
}

/// Service option for `TranslateSvcConfig`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub device_id: DeviceId,
    /// Service name.
    pub name: String,
    pub key: String,
    pub value: String,
}

/// One device command. Opaque to everything but the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Command(pub String);

impl Command {
    pub fn new(command: impl Into<String>) -> Self {
        Self(command.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Command {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Ordered commands for exactly one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSeq {
    pub device_id: DeviceId,
    #[serde(default)]
    pub commands: Vec<Command>,
}

impl CommandSeq {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            commands: Vec::new(),
        }
    }

    /// Build a sequence from command strings.
    pub fn with_commands<I, C>(device_id: DeviceId, commands: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Command>,
    {
        Self {
            device_id,
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// Every command followed by a newline, the raw artifact format.
    pub fn to_raw(&self) -> String {
        let mut out = String::new();
        for cmd in &self.commands {
            out.push_str(cmd.as_str());
            out.push('\n');
        }
        out
    }
}

/// Generic success flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolReply {
    pub ok: bool,
}

impl From<bool> for BoolReply {
    fn from(ok: bool) -> Self {
        Self { ok }
    }
}

/// Driver registration sent to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegRequest {
    pub name: String,
    /// Socket the driver serves its RPCs on.
    pub socket: PathBuf,
}

/// Metadata lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvRequest {
    pub device_id: DeviceId,
    pub key: String,
}

/// Metadata record. Values are opaque and may be secrets.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvPair {
    pub device_id: DeviceId,
    pub key: String,
    pub value: String,
}

impl fmt::Debug for KvPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvPair")
            .field("device_id", &self.device_id)
            .field("key", &self.key)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Device selector for `GetConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    pub device_id: DeviceId,
}

/// Configuration files as they exist on a device, by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFiles {
    #[serde(default)]
    pub files: IndexMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_seq_wire_shape() {
        let seq = CommandSeq::with_commands(DeviceId(7), ["service ssh stop", "true"]);
        assert_eq!(
            serde_json::to_value(&seq).unwrap(),
            json!({"device_id": 7, "commands": ["service ssh stop", "true"]})
        );
    }

    #[test]
    fn test_command_seq_missing_commands() {
        let seq: CommandSeq = serde_json::from_value(json!({"device_id": 3})).unwrap();
        assert!(seq.is_empty());
    }

    #[test]
    fn test_to_raw() {
        let seq = CommandSeq::with_commands(DeviceId(1), ["a", "b"]);
        assert_eq!(seq.to_raw(), "a\nb\n");
        assert_eq!(CommandSeq::new(DeviceId(1)).to_raw(), "");
    }

    #[test]
    fn test_secrets_not_in_debug() {
        let up = UserPass {
            device_id: DeviceId(1),
            username: "root".into(),
            password: "s3cret".into(),
        };
        assert!(!format!("{up:?}").contains("s3cret"));

        let kv = KvPair {
            device_id: DeviceId(1),
            key: "password".into(),
            value: "s3cret".into(),
        };
        assert!(!format!("{kv:?}").contains("s3cret"));
    }

    #[test]
    fn test_config_files_keep_order() {
        let mut files = ConfigFiles::default();
        files.files.insert("z.conf".into(), "1".into());
        files.files.insert("a.conf".into(), "2".into());
        let text = serde_json::to_string(&files).unwrap();
        assert_eq!(text, r#"{"files":{"z.conf":"1","a.conf":"2"}}"#);
    }
}
