//! 工具模块
//!
//! 提供错误类型和执行状态管理。

pub mod error;
pub mod state;

pub use error::TerminalError;
pub use state::{ExecStateMachine, StateTransitionResult};
