//! 错误类型定义
//!
//! 定义 PTY 桥接层的错误类型，提供描述性错误消息。
//!
//! ## 功能
//! - 定义 TerminalError 枚举，涵盖所有可能的错误类型
//! - 实现错误转换（From trait）
//! - 提供错误分类和辅助方法
//! - 支持与 JSON-RPC 错误格式互相转换

use thiserror::Error;

use crate::rpc::types::JsonRpcError;

/// 终端错误类型
#[derive(Debug, Error)]
pub enum TerminalError {
    /// Shell 进程启动失败（可执行文件不存在、权限不足等）
    #[error("Shell 启动失败: {0}")]
    SpawnFailed(String),

    /// 会话不存在
    #[error("会话不存在: {0}")]
    SessionNotFound(String),

    /// 会话正在执行其他命令
    #[error("会话正忙: {0}")]
    SessionBusy(String),

    /// 通道已关闭（dispose 之后的调用）
    #[error("通道已关闭: {0}")]
    ChannelClosed(String),

    /// 软中断发送失败
    #[error("中断发送失败: {0}")]
    InterruptFailed(String),

    /// 无效的请求
    #[error("无效的请求: {0}")]
    InvalidRequest(String),

    /// 无效的日志匹配模式
    #[error("无效的匹配模式: {0}")]
    InvalidPattern(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// 通道错误
    #[error("通道错误: {0}")]
    ChannelError(String),

    /// 对端返回的无法归类的错误
    #[error("远端错误 ({code}): {message}")]
    Remote { code: i32, message: String },
}

impl From<regex::Error> for TerminalError {
    fn from(err: regex::Error) -> Self {
        TerminalError::InvalidPattern(err.to_string())
    }
}

impl From<TerminalError> for JsonRpcError {
    fn from(err: TerminalError) -> Self {
        // 应用特定的错误码范围 (-32000 到 -32099)
        let code = match &err {
            TerminalError::SessionNotFound(_) => -32001,
            TerminalError::ChannelClosed(_) => -32002,
            TerminalError::SessionBusy(_) => -32003,
            TerminalError::InvalidRequest(_) => -32602,
            TerminalError::InvalidPattern(_) => -32602,
            TerminalError::SerializationError(_) => -32700,
            TerminalError::SpawnFailed(_) => -32010,
            TerminalError::InterruptFailed(_) => -32011,
            TerminalError::ChannelError(_) => -32026,
            TerminalError::IoError(_) => -32603,
            TerminalError::Remote { code, .. } => *code,
        };

        let message = match &err {
            // 远端错误原样透传，避免重复包装
            TerminalError::Remote { message, .. } => message.clone(),
            _ => err.to_string(),
        };

        JsonRpcError {
            code,
            message,
            data: Some(serde_json::json!({
                "error_type": err.error_type(),
                "error_code": err.code(),
                "recoverable": err.is_recoverable(),
                "detail": err.detail(),
            })),
        }
    }
}

impl TerminalError {
    /// 获取错误码
    pub fn code(&self) -> i32 {
        match self {
            TerminalError::SpawnFailed(_) => 1001,
            TerminalError::SessionNotFound(_) => 1003,
            TerminalError::InvalidRequest(_) => 1004,
            TerminalError::IoError(_) => 1005,
            TerminalError::SerializationError(_) => 1006,
            TerminalError::ChannelClosed(_) => 1009,
            TerminalError::ChannelError(_) => 1011,
            TerminalError::SessionBusy(_) => 1014,
            TerminalError::InterruptFailed(_) => 1015,
            TerminalError::InvalidPattern(_) => 1016,
            TerminalError::Remote { .. } => 1099,
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            TerminalError::SpawnFailed(_) => "spawn_failed",
            TerminalError::SessionNotFound(_) => "session_not_found",
            TerminalError::SessionBusy(_) => "session_busy",
            TerminalError::ChannelClosed(_) => "channel_closed",
            TerminalError::InterruptFailed(_) => "interrupt_failed",
            TerminalError::InvalidRequest(_) => "invalid_request",
            TerminalError::InvalidPattern(_) => "invalid_pattern",
            TerminalError::IoError(_) => "io_error",
            TerminalError::SerializationError(_) => "serialization_error",
            TerminalError::ChannelError(_) => "channel_error",
            TerminalError::Remote { .. } => "remote",
        }
    }

    /// 错误详情（不含类型前缀）
    pub fn detail(&self) -> String {
        match self {
            TerminalError::SpawnFailed(m)
            | TerminalError::SessionNotFound(m)
            | TerminalError::SessionBusy(m)
            | TerminalError::ChannelClosed(m)
            | TerminalError::InterruptFailed(m)
            | TerminalError::InvalidRequest(m)
            | TerminalError::InvalidPattern(m)
            | TerminalError::ChannelError(m) => m.clone(),
            TerminalError::IoError(e) => e.to_string(),
            TerminalError::SerializationError(e) => e.to_string(),
            TerminalError::Remote { message, .. } => message.clone(),
        }
    }

    /// 检查是否为可恢复错误
    ///
    /// 会话正忙时稍后重试即可；其余错误需要调用方介入。
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TerminalError::SessionBusy(_))
    }

    /// 检查是否为通道相关错误
    pub fn is_channel_error(&self) -> bool {
        matches!(
            self,
            TerminalError::ChannelClosed(_) | TerminalError::ChannelError(_)
        )
    }

    /// 从对端返回的 JSON-RPC 错误还原错误类型
    ///
    /// 依据 `data.error_type` 还原；缺失或未知时归为 `Remote`。
    pub fn from_remote(err: JsonRpcError) -> Self {
        let field = |name: &str| {
            err.data
                .as_ref()
                .and_then(|d| d.get(name))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let error_type = field("error_type").unwrap_or_default();
        let message = field("detail").unwrap_or_else(|| err.message.clone());

        match error_type.as_str() {
            "spawn_failed" => TerminalError::SpawnFailed(message),
            "session_not_found" => TerminalError::SessionNotFound(message),
            "session_busy" => TerminalError::SessionBusy(message),
            "channel_closed" => TerminalError::ChannelClosed(message),
            "invalid_request" => TerminalError::InvalidRequest(message),
            "invalid_pattern" => TerminalError::InvalidPattern(message),
            "channel_error" => TerminalError::ChannelError(message),
            _ => TerminalError::Remote {
                code: err.code,
                message,
            },
        }
    }

    // ============ 错误构造辅助方法 ============

    /// 创建 Shell 启动失败错误（包含可执行文件信息）
    pub fn spawn_failed(program: &str, reason: impl std::fmt::Display) -> Self {
        TerminalError::SpawnFailed(format!("无法启动 {}: {}", program, reason))
    }

    /// 创建通道关闭错误
    pub fn channel_closed(channel: &str) -> Self {
        TerminalError::ChannelClosed(format!("通道 {} 已释放", channel))
    }

    /// 创建会话正忙错误
    pub fn session_busy(session_id: &str) -> Self {
        TerminalError::SessionBusy(format!("会话 {} 已有正在执行的命令", session_id))
    }
}


/// Property-based tests for error mapping
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn error_strategy() -> impl Strategy<Value = TerminalError> {
        let msg = "[a-zA-Z0-9 ]{1,30}";
        prop_oneof![
            msg.prop_map(TerminalError::SpawnFailed),
            msg.prop_map(TerminalError::SessionNotFound),
            msg.prop_map(TerminalError::SessionBusy),
            msg.prop_map(TerminalError::ChannelClosed),
            msg.prop_map(TerminalError::InvalidRequest),
            msg.prop_map(TerminalError::InvalidPattern),
            msg.prop_map(TerminalError::ChannelError),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// 经过 JSON-RPC 传输后错误类型保持不变
        #[test]
        fn prop_error_type_survives_transport(err in error_strategy()) {
            let error_type = err.error_type();
            let code = err.code();
            let restored = TerminalError::from_remote(err.into());
            prop_assert_eq!(restored.error_type(), error_type);
            prop_assert_eq!(restored.code(), code);
        }

        /// 所有错误都映射到 JSON-RPC 保留的负数错误码
        #[test]
        fn prop_rpc_codes_are_negative(err in error_strategy()) {
            let rpc: JsonRpcError = err.into();
            prop_assert!(rpc.code < -32000 || rpc.code == -32602);
        }
    }
}
