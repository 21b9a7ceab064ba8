//! 桥接消息类型
//!
//! 视图端与会话端之间传递的消息：
//! - 视图端 → 会话端：调用请求（exec / resize / kill）和释放通知
//! - 会话端 → 视图端：推送事件（data / executing）和调用响应

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use crate::rpc::types::{ExecConfig, ExecResult, JsonRpcError, TermSize};
use crate::utils::error::TerminalError;

/// 通道标识
///
/// 每个终端视图对应一个稳定的通道标识，用于把调用和推送事件路由到正确的会话。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 生成随机通道标识
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// 推送事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "lowercase")]
pub enum PushEvent {
    /// 一段进程输出
    Data(String),
    /// 执行状态变化
    Executing(bool),
}

impl PushEvent {
    /// 事件方法名
    pub fn method(&self) -> &'static str {
        match self {
            PushEvent::Data(_) => "data",
            PushEvent::Executing(_) => "executing",
        }
    }

    /// 事件参数列表
    pub fn args(&self) -> Vec<serde_json::Value> {
        match self {
            PushEvent::Data(chunk) => vec![serde_json::json!(chunk)],
            PushEvent::Executing(executing) => vec![serde_json::json!(executing)],
        }
    }

    /// 由方法名和参数还原事件
    pub fn from_parts(method: &str, args: &[serde_json::Value]) -> Option<Self> {
        match (method, args.first()) {
            ("data", Some(serde_json::Value::String(chunk))) => Some(PushEvent::Data(chunk.clone())),
            ("executing", Some(serde_json::Value::Bool(flag))) => Some(PushEvent::Executing(*flag)),
            _ => None,
        }
    }
}

/// 调用请求
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Exec { command: String, config: ExecConfig },
    Resize(TermSize),
    Kill,
}

impl Invocation {
    pub fn method(&self) -> &'static str {
        match self {
            Invocation::Exec { .. } => "exec",
            Invocation::Resize(_) => "resize",
            Invocation::Kill => "kill",
        }
    }

    /// 由方法名和位置参数构造调用
    ///
    /// - `exec(command, config?)`
    /// - `resize({cols, rows})`
    /// - `kill()`
    pub fn from_method(method: &str, args: &[serde_json::Value]) -> Result<Self, TerminalError> {
        match method {
            "exec" => {
                let command = args
                    .first()
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| TerminalError::InvalidRequest("exec 缺少命令参数".to_string()))?
                    .to_string();
                let config = match args.get(1) {
                    None | Some(serde_json::Value::Null) => ExecConfig::default(),
                    Some(value) => serde_json::from_value(value.clone())?,
                };
                Ok(Invocation::Exec { command, config })
            }
            "resize" => {
                let size = args
                    .first()
                    .cloned()
                    .ok_or_else(|| TerminalError::InvalidRequest("resize 缺少尺寸参数".to_string()))?;
                Ok(Invocation::Resize(serde_json::from_value(size)?))
            }
            "kill" => Ok(Invocation::Kill),
            other => Err(TerminalError::InvalidRequest(format!("未知的方法: {}", other))),
        }
    }
}

/// 调用响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// exec 的执行结果
    Exec(ExecResult),
    /// resize / kill 完成
    Done,
}

impl Reply {
    /// 转换为 JSON-RPC 结果值
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Reply::Exec(result) => serde_json::json!({
                "exit_code": result.exit_code,
                "log": result.log,
            }),
            Reply::Done => serde_json::Value::Null,
        }
    }
}

/// 视图端 → 会话端
#[derive(Debug, Clone)]
pub enum ToHost {
    Invoke {
        id: u64,
        channel: ChannelId,
        call: Invocation,
    },
    Dispose {
        channel: ChannelId,
    },
}

/// 会话端 → 视图端
#[derive(Debug, Clone)]
pub enum ToView {
    Event {
        channel: ChannelId,
        event: PushEvent,
    },
    Reply {
        id: u64,
        result: Result<Reply, JsonRpcError>,
    },
}

/// 会话端到视图端的发送器，可以克隆并在多个地方使用
///
/// 所有推送事件和响应进入同一个有序队列。
#[derive(Clone)]
pub struct ViewSender {
    tx: mpsc::UnboundedSender<ToView>,
}

impl ViewSender {
    pub fn new(tx: mpsc::UnboundedSender<ToView>) -> Self {
        Self { tx }
    }

    /// 发送消息
    pub fn send(&self, message: ToView) -> Result<(), TerminalError> {
        self.tx
            .send(message)
            .map_err(|_| TerminalError::ChannelClosed("视图端已断开".to_string()))
    }

    /// 发送推送事件
    pub fn send_event(&self, channel: &ChannelId, event: PushEvent) -> Result<(), TerminalError> {
        self.send(ToView::Event {
            channel: channel.clone(),
            event,
        })
    }

    /// 发送输出事件
    pub fn send_data(&self, channel: &ChannelId, chunk: &str) -> Result<(), TerminalError> {
        self.send_event(channel, PushEvent::Data(chunk.to_string()))
    }

    /// 发送执行状态事件
    pub fn send_executing(&self, channel: &ChannelId, executing: bool) -> Result<(), TerminalError> {
        self.send_event(channel, PushEvent::Executing(executing))
    }

    /// 发送调用响应
    pub fn send_reply(&self, id: u64, result: Result<Reply, JsonRpcError>) -> Result<(), TerminalError> {
        self.send(ToView::Reply { id, result })
    }
}
