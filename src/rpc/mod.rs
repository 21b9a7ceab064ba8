//! RPC 通信模块
//!
//! 实现 JSON-RPC 2.0 协议的服务器端，通过 stdin/stdout 与前端通信。

pub mod codec;
pub mod server;
pub mod types;

pub use codec::{decode_call, encode_host_message, encode_view_message, RpcCall};
pub use server::RpcServer;
pub use types::*;
