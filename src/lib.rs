//! PTY 会话桥接库
//!
//! 在伪终端中执行 shell 命令，并通过与传输无关的通道把输出推送到终端视图。

pub mod bridge;
pub mod config;
pub mod pty;
pub mod rpc;
pub mod shell;
pub mod utils;
