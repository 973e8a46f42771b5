//! Configuration language compiler.
//!
//! Turns operator text into an ordered list of [`Operation`]s. Keywords
//! (`SET`, `PASSWORD`, `SERVICE`, `ON`/`OFF`) are case-insensitive; every
//! other token is passed through verbatim so device-specific value syntax
//! reaches the driver untouched.
//!
//! # Example
//!
//! ```rust
//! use devconf::compiler::{self, Operation};
//!
//! let ops = compiler::parse("SET hostname relay1 SERVICE telnet OFF").unwrap();
//! assert_eq!(ops[1], Operation::Service { name: "telnet".into(), state: "OFF".into() });
//! ```

pub mod lexer;
mod parser;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};

/// One parsed configuration intent.
#[derive(Clone, PartialEq, Eq)]
pub enum Operation {
    /// Turn a service on or off.
    Service { name: String, state: String },

    /// Set a user's password.
    Password { username: String, password: String },

    /// Set an arbitrary device variable.
    Variable { key: String, value: String },

    /// Set an option of a service.
    ServiceOption {
        service: String,
        key: String,
        value: String,
    },
}

impl Operation {
    /// Operation category name.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Service { .. } => "service",
            Operation::Password { .. } => "password",
            Operation::Variable { .. } => "variable",
            Operation::ServiceOption { .. } => "service_option",
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Service { name, state } => f
                .debug_struct("Service")
                .field("name", name)
                .field("state", state)
                .finish(),
            Operation::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"********")
                .finish(),
            Operation::Variable { key, value } => f
                .debug_struct("Variable")
                .field("key", key)
                .field("value", value)
                .finish(),
            Operation::ServiceOption {
                service,
                key,
                value,
            } => f
                .debug_struct("ServiceOption")
                .field("service", service)
                .field("key", key)
                .field("value", value)
                .finish(),
        }
    }
}

/// Flat record used by the preview output and policy consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarshalledOp {
    #[serde(rename = "Op")]
    pub op: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Val")]
    pub val: String,
    #[serde(rename = "Svc")]
    pub svc: String,
}

impl From<&Operation> for MarshalledOp {
    fn from(op: &Operation) -> Self {
        let (key, val, svc) = match op {
            Operation::Service { name, state } => (name, state, None),
            Operation::Password { username, password } => (username, password, None),
            Operation::Variable { key, value } => (key, value, None),
            Operation::ServiceOption {
                service,
                key,
                value,
            } => (key, value, Some(service)),
        };
        Self {
            op: op.kind().to_string(),
            key: key.clone(),
            val: val.clone(),
            svc: svc.cloned().unwrap_or_default(),
        }
    }
}

/// Parse configuration text into operations, in source order.
///
/// Parsing is all-or-nothing: the first lexical or grammar error aborts
/// the batch and no operations are returned.
pub fn parse(text: &str) -> std::result::Result<Vec<Operation>, CompileError> {
    parser::parse(text)
}

/// Parse configuration text and render the operations as JSON without
/// executing anything (dry-run preview).
pub fn marshalled(text: &str) -> Result<String> {
    let ops: Vec<MarshalledOp> = parse(text)?.iter().map(MarshalledOp::from).collect();
    Ok(serde_json::to_string(&ops).map_err(CompileError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshalled_shape() {
        let json = marshalled("SERVICE ssh Port 22 PASSWORD level2 abcdefGHIK").unwrap();
        let ops: Vec<MarshalledOp> = serde_json::from_str(&json).unwrap();
        assert_eq!(
            ops[0],
            MarshalledOp {
                op: "service_option".into(),
                key: "Port".into(),
                val: "22".into(),
                svc: "ssh".into(),
            }
        );
        assert_eq!(ops[1].op, "password");
        assert_eq!(ops[1].key, "level2");
        assert_eq!(ops[1].svc, "");
        assert!(json.starts_with(r#"[{"Op":"service_option","Key":"Port""#));
    }

    #[test]
    fn test_marshalled_propagates_compile_error() {
        let err = marshalled("SERVICE").unwrap_err();
        assert!(matches!(err, crate::Error::Compile(_)));
    }

    #[test]
    fn test_encode_failure_is_compile_error() {
        let json_err = serde_json::from_str::<u8>("not json").unwrap_err();
        let err: crate::Error = CompileError::from(json_err).into();
        assert!(matches!(err, crate::Error::Compile(CompileError::Encode(_))));
    }

    #[test]
    fn test_debug_hides_password() {
        let op = Operation::Password {
            username: "root".into(),
            password: "hunter2".into(),
        };
        let dbg = format!("{op:?}");
        assert!(dbg.contains("root"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn test_order_preserved() {
        let ops = parse("SET a 1 SET b 2 SET a 3").unwrap();
        let keys: Vec<_> = ops
            .iter()
            .map(|op| match op {
                Operation::Variable { value, .. } => value.as_str(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, ["1", "2", "3"]);
    }
}
