//! Local-socket RPC shared by the gateway, the coordinator and driver
//! processes.
//!
//! The protocol is deliberately small so drivers can be written in any
//! language: length-prefixed JSON frames over a Unix domain socket (see
//! [`codec`]). Method names and bodies are listed in [`method`] and
//! [`message`].

pub mod client;
pub mod codec;
pub mod message;
pub mod server;

pub use client::RpcClient;
pub use message::{
    BoolReply, Command, CommandSeq, ConfigFiles, DeviceRef, KvPair, KvRequest, RegRequest,
    Service, ServiceConfig, UserPass, Var,
};
pub use server::{Handler, serve, serve_connection};

/// RPC method names.
pub mod method {
    /// Gateway: register a driver. `RegRequest` → `BoolReply`.
    pub const REGISTER: &str = "Register";
    /// Gateway: read device metadata. `KvRequest` → `KvPair`.
    pub const GET_META: &str = "GetMeta";
    /// Gateway: write device metadata. `KvPair` → `BoolReply`.
    pub const SAVE_META: &str = "SaveMeta";

    /// Driver: `UserPass` → `CommandSeq`.
    pub const TRANSLATE_PASS: &str = "TranslatePass";
    /// Driver: `Service` → `CommandSeq`.
    pub const TRANSLATE_SERVICE: &str = "TranslateService";
    /// Driver: `Var` → `CommandSeq`.
    pub const TRANSLATE_VAR: &str = "TranslateVar";
    /// Driver: `ServiceConfig` → `CommandSeq`.
    pub const TRANSLATE_SVC_CONFIG: &str = "TranslateSvcConfig";
    /// Driver: `CommandSeq` → `BoolReply`.
    pub const EXECUTE_CONFIG: &str = "ExecuteConfig";
    /// Driver: `DeviceRef` → `ConfigFiles`.
    pub const GET_CONFIG: &str = "GetConfig";
}
