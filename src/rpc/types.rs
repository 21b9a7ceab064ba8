//! RPC 数据类型定义
//!
//! 定义执行配置、执行结果以及 JSON-RPC 请求、响应和通知的数据结构。

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

use crate::utils::error::TerminalError;

/// 新进程的默认列数
pub const DEFAULT_COLS: u16 = 87;
/// 新进程的默认行数
pub const DEFAULT_ROWS: u16 = 19;

/// 终端尺寸
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self {
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

/// 日志匹配模式
///
/// 序列化为正则表达式源字符串。
#[derive(Debug, Clone)]
pub struct LogPattern(Regex);

impl LogPattern {
    /// 编译匹配模式
    pub fn new(pattern: &str) -> Result<Self, TerminalError> {
        Ok(Self(Regex::new(pattern)?))
    }

    pub fn is_match(&self, log: &str) -> bool {
        self.0.is_match(log)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for LogPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for LogPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Regex::new(&source)
            .map(LogPattern)
            .map_err(serde::de::Error::custom)
    }
}

/// 执行配置
///
/// 所有字段均可选；显式给出的字段覆盖会话默认值。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecConfig {
    /// 覆盖默认 shell 可执行文件
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// 覆盖 shell 启动参数（命令本身始终追加在最后）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
    /// 收到第一段输出即视为完成
    #[serde(default)]
    pub resolve_on_first_log: bool,
    /// 累积输出匹配该模式即视为完成
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_on_log: Option<LogPattern>,
}

impl ExecConfig {
    /// 将本配置合并到默认配置之上
    ///
    /// 标量字段以本配置为准；环境变量逐项覆盖。
    pub fn merged_over(self, defaults: &ExecConfig) -> ExecConfig {
        let env = match (&defaults.env, self.env) {
            (None, None) => None,
            (Some(base), None) => Some(base.clone()),
            (None, Some(own)) => Some(own),
            (Some(base), Some(own)) => {
                let mut merged = base.clone();
                merged.extend(own);
                Some(merged)
            }
        };

        ExecConfig {
            shell: self.shell.or_else(|| defaults.shell.clone()),
            args: self.args.or_else(|| defaults.args.clone()),
            cwd: self.cwd.or_else(|| defaults.cwd.clone()),
            env,
            cols: self.cols.or(defaults.cols),
            rows: self.rows.or(defaults.rows),
            resolve_on_first_log: self.resolve_on_first_log || defaults.resolve_on_first_log,
            resolve_on_log: self.resolve_on_log.or_else(|| defaults.resolve_on_log.clone()),
        }
    }

    /// 计算终端尺寸，缺失的维度取 `fallback`
    pub fn term_size(&self, fallback: TermSize) -> TermSize {
        TermSize {
            cols: self.cols.unwrap_or(fallback.cols),
            rows: self.rows.unwrap_or(fallback.rows),
        }
    }
}

/// 执行结果
///
/// `exit_code` 为 `None` 表示在进程退出前因完成条件提前返回。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: Option<i32>,
    pub log: String,
}

/// 会话执行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    /// 空闲，可以执行新命令
    Idle,
    /// 有进程正在运行
    Running,
}

/// 会话信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub channel: String,
    pub status: ExecStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
}

// ============ RPC 请求参数 ============

/// exec 请求参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecParams {
    pub channel: String,
    pub command: String,
    #[serde(default)]
    pub config: ExecConfig,
}

/// resize 请求参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeParams {
    pub channel: String,
    #[serde(flatten)]
    pub size: TermSize,
}

/// 只包含通道标识的请求参数（kill、dispose）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelParams {
    pub channel: String,
}

// ============ RPC 通知参数 ============

/// 推送事件通知参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventParams {
    pub channel: String,
    pub args: Vec<serde_json::Value>,
}

// ============ JSON-RPC 2.0 协议类型 ============

/// JSON-RPC 请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// 缺失或为 null 时视为通知，不返回响应
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub id: serde_json::Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
            id: serde_json::json!(id),
        }
    }

    /// 创建不需要响应的请求
    pub fn notification(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
            id: serde_json::Value::Null,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_null()
    }
}

/// JSON-RPC 响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: serde_json::Value,
}

impl JsonRpcResponse {
    /// 创建成功响应
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// 创建错误响应
    pub fn error(id: serde_json::Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// JSON-RPC 错误
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    /// 解析错误 (-32700)
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    /// 无效请求 (-32600)
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    /// 方法不存在 (-32601)
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method.into()),
            data: None,
        }
    }

    /// 无效参数 (-32602)
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    /// 内部错误 (-32603)
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }
}

/// JSON-RPC 通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// 创建新通知
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
        }
    }
}
