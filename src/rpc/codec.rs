//! 桥接消息与 JSON-RPC 之间的转换
//!
//! 请求方法：
//! - `exec {channel, command, config?}`
//! - `resize {channel, cols, rows}`
//! - `kill {channel}`
//! - `dispose {channel}`
//! - `session.list`
//!
//! 推送事件编码为通知：`data` / `executing`，参数为 `{channel, args}`。

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::bridge::message::{ChannelId, Invocation, PushEvent, Reply, ToHost, ToView};
use crate::rpc::types::{
    ChannelParams, EventParams, ExecParams, ExecResult, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ResizeParams,
};
use crate::utils::error::TerminalError;

/// 解码后的请求
#[derive(Debug, Clone, PartialEq)]
pub enum RpcCall {
    Invoke { channel: ChannelId, call: Invocation },
    Dispose { channel: ChannelId },
    ListSessions,
}

/// 解析请求 ID，必须为非负整数
pub fn request_id(id: &Value) -> Result<u64, JsonRpcError> {
    id.as_u64()
        .ok_or_else(|| JsonRpcError::invalid_request(format!("无效的请求 ID: {}", id)))
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::invalid_params("缺少参数"))?;
    serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

/// 解码请求方法和参数
pub fn decode_call(method: &str, params: Option<Value>) -> Result<RpcCall, JsonRpcError> {
    match method {
        "exec" => {
            let p: ExecParams = parse_params(params)?;
            Ok(RpcCall::Invoke {
                channel: p.channel.into(),
                call: Invocation::Exec {
                    command: p.command,
                    config: p.config,
                },
            })
        }
        "resize" => {
            let p: ResizeParams = parse_params(params)?;
            Ok(RpcCall::Invoke {
                channel: p.channel.into(),
                call: Invocation::Resize(p.size),
            })
        }
        "kill" => {
            let p: ChannelParams = parse_params(params)?;
            Ok(RpcCall::Invoke {
                channel: p.channel.into(),
                call: Invocation::Kill,
            })
        }
        "dispose" => {
            let p: ChannelParams = parse_params(params)?;
            Ok(RpcCall::Dispose {
                channel: p.channel.into(),
            })
        }
        "session.list" => Ok(RpcCall::ListSessions),
        _ => Err(JsonRpcError::method_not_found(method)),
    }
}

/// 将视图端消息编码为 JSON-RPC 请求
///
/// 释放通知没有请求 ID，不期待响应。
pub fn encode_host_message(message: &ToHost) -> JsonRpcRequest {
    match message {
        ToHost::Invoke { id, channel, call } => {
            let params = match call {
                Invocation::Exec { command, config } => serde_json::json!({
                    "channel": channel,
                    "command": command,
                    "config": config,
                }),
                Invocation::Resize(size) => serde_json::json!({
                    "channel": channel,
                    "cols": size.cols,
                    "rows": size.rows,
                }),
                Invocation::Kill => serde_json::json!({ "channel": channel }),
            };
            JsonRpcRequest::new(*id, call.method(), params)
        }
        ToHost::Dispose { channel } => {
            JsonRpcRequest::notification("dispose", serde_json::json!({ "channel": channel }))
        }
    }
}

/// 将会话端消息编码为 JSON 值（通知或响应）
pub fn encode_view_message(message: ToView) -> Result<Value, TerminalError> {
    let value = match message {
        ToView::Event { channel, event } => {
            let params = EventParams {
                channel: channel.to_string(),
                args: event.args(),
            };
            serde_json::to_value(JsonRpcNotification::new(
                event.method(),
                serde_json::to_value(params)?,
            ))?
        }
        ToView::Reply { id, result } => {
            let response = match result {
                Ok(reply) => JsonRpcResponse::success(serde_json::json!(id), reply.to_value()),
                Err(error) => JsonRpcResponse::error(serde_json::json!(id), error),
            };
            serde_json::to_value(response)?
        }
    };
    Ok(value)
}

/// 从 JSON 值还原会话端消息
///
/// 包含 `method` 的视为推送事件通知，否则视为响应。
pub fn decode_view_message(value: Value) -> Result<ToView, TerminalError> {
    if let Some(method) = value.get("method").and_then(Value::as_str) {
        let method = method.to_string();
        let params: EventParams = serde_json::from_value(
            value
                .get("params")
                .cloned()
                .ok_or_else(|| TerminalError::InvalidRequest("通知缺少参数".to_string()))?,
        )?;
        let event = PushEvent::from_parts(&method, &params.args)
            .ok_or_else(|| TerminalError::InvalidRequest(format!("未知的推送事件: {}", method)))?;
        return Ok(ToView::Event {
            channel: params.channel.into(),
            event,
        });
    }

    let response: JsonRpcResponse = serde_json::from_value(value)?;
    let id = request_id(&response.id).map_err(TerminalError::from_remote)?;
    let result = match (response.error, response.result) {
        (Some(error), _) => Err(error),
        (None, None) | (None, Some(Value::Null)) => Ok(Reply::Done),
        (None, Some(result)) => Ok(Reply::Exec(serde_json::from_value::<ExecResult>(result)?)),
    };
    Ok(ToView::Reply { id, result })
}
