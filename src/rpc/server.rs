//! RPC 服务器实现
//!
//! 通过 stdin/stdout 实现 JSON-RPC 2.0 通信，每行一条消息。
//! 所有输出（响应和推送通知）经由同一个写任务按顺序写出。

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::bridge::host::serve;
use crate::bridge::message::{ToHost, ToView, ViewSender};
use crate::config::BridgeConfig;
use crate::pty::manager::PtyManager;

use super::codec::{decode_call, encode_view_message, request_id, RpcCall};
use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// 退出时等待剩余输出写出的时长
const FLUSH_GRACE: Duration = Duration::from_secs(3);

/// RPC 服务器
pub struct RpcServer {
    config: BridgeConfig,
}

impl RpcServer {
    /// 创建新的 RPC 服务器
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// 在 stdin/stdout 上运行 RPC 服务器
    pub async fn run(&self) -> anyhow::Result<()> {
        self.run_with(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// 在给定的读写流上运行 RPC 服务器，读到 EOF 时关闭所有会话并返回
    pub async fn run_with<R, W>(&self, reader: R, writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(write_lines(writer, line_rx));

        let (view_tx, view_rx) = mpsc::unbounded_channel::<ToView>();
        let events = ViewSender::new(view_tx);
        let manager = Arc::new(PtyManager::new(&self.config, events.clone()));

        let (host_tx, host_rx) = mpsc::unbounded_channel::<ToHost>();
        let dispatcher = serve(Arc::clone(&manager), host_rx, events);
        let forwarder = tokio::spawn(forward_view_messages(view_rx, line_tx.clone()));

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(response) = self.handle_request(line, &manager, &host_tx).await {
                let json = serde_json::to_string(&response)?;
                if line_tx.send(json).is_err() {
                    tracing::error!("输出通道已关闭");
                    break;
                }
            }
        }

        tracing::info!("stdin 关闭，退出");
        drop(host_tx);
        manager.shutdown().await;
        drop(manager);
        if let Err(e) = dispatcher.await {
            tracing::warn!("分发任务异常退出: {}", e);
        }

        // 等待仍在运行的调用把响应写出
        if tokio::time::timeout(FLUSH_GRACE, forwarder).await.is_err() {
            tracing::warn!("等待剩余输出超时");
        }
        drop(line_tx);
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("写出失败: {}", e),
            Err(e) => tracing::warn!("写任务异常退出: {}", e),
        }

        Ok(())
    }

    /// 处理单个请求，需要立即响应时返回响应
    async fn handle_request(
        &self,
        line: &str,
        manager: &PtyManager,
        host: &mpsc::UnboundedSender<ToHost>,
    ) -> Option<JsonRpcResponse> {
        // 解析 JSON
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    Value::Null,
                    JsonRpcError::parse_error(format!("JSON 解析错误: {}", e)),
                ));
            }
        };

        // 验证 JSON-RPC 版本
        if request.jsonrpc != "2.0" {
            return respond(
                request.id,
                Err(JsonRpcError::invalid_request("无效的 JSON-RPC 版本")),
            );
        }

        let call = match decode_call(&request.method, request.params) {
            Ok(call) => call,
            Err(e) => return respond(request.id, Err(e)),
        };

        match call {
            RpcCall::ListSessions => {
                let sessions = manager.list_sessions().await;
                let result = serde_json::to_value(sessions)
                    .map_err(|e| JsonRpcError::internal_error(e.to_string()));
                respond(request.id, result)
            }
            RpcCall::Dispose { channel } => {
                if host.send(ToHost::Dispose { channel }).is_err() {
                    tracing::warn!("分发任务已退出，忽略释放请求");
                }
                respond(request.id, Ok(Value::Null))
            }
            RpcCall::Invoke { channel, call } => {
                if request.id.is_null() {
                    tracing::warn!("忽略没有 ID 的 {} 调用", call.method());
                    return None;
                }
                let id = match request_id(&request.id) {
                    Ok(id) => id,
                    Err(e) => return Some(JsonRpcResponse::error(request.id, e)),
                };
                if host.send(ToHost::Invoke { id, channel, call }).is_err() {
                    return Some(JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::internal_error("分发任务已退出"),
                    ));
                }
                None
            }
        }
    }
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

/// 通知（无 ID）不返回响应
fn respond(id: Value, result: Result<Value, JsonRpcError>) -> Option<JsonRpcResponse> {
    if id.is_null() {
        return None;
    }
    Some(match result {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(error) => JsonRpcResponse::error(id, error),
    })
}

async fn forward_view_messages(
    mut messages: mpsc::UnboundedReceiver<ToView>,
    lines: mpsc::UnboundedSender<String>,
) {
    while let Some(message) = messages.recv().await {
        match encode_view_message(message) {
            Ok(value) => {
                if lines.send(value.to_string()).is_err() {
                    break;
                }
            }
            Err(e) => tracing::error!("编码输出消息失败: {}", e),
        }
    }
}

async fn write_lines<W>(mut writer: W, mut lines: mpsc::UnboundedReceiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream, Lines};
    use tokio::task::JoinHandle;

    struct Peer {
        input: DuplexStream,
        output: Lines<BufReader<DuplexStream>>,
        server: JoinHandle<anyhow::Result<()>>,
    }

    fn start_server() -> Peer {
        let (input, server_in) = duplex(64 * 1024);
        let (server_out, output) = duplex(64 * 1024);
        let config = BridgeConfig {
            shell: Some("/bin/sh".to_string()),
            ..Default::default()
        };
        let server = tokio::spawn(async move {
            RpcServer::new(config)
                .run_with(BufReader::new(server_in), server_out)
                .await
        });
        Peer {
            input,
            output: BufReader::new(output).lines(),
            server,
        }
    }

    impl Peer {
        async fn send(&mut self, line: &str) {
            self.input.write_all(line.as_bytes()).await.unwrap();
            self.input.write_all(b"\n").await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let line = self.output.next_line().await.unwrap().expect("server output");
            serde_json::from_str(&line).unwrap()
        }

        /// 读取直到出现指定 ID 的响应，返回途中收到的通知
        async fn recv_response(&mut self, id: u64) -> (Value, Vec<Value>) {
            let mut notifications = Vec::new();
            loop {
                let value = self.recv().await;
                if value.get("method").is_some() {
                    notifications.push(value);
                } else if value["id"] == id {
                    return (value, notifications);
                }
            }
        }

        async fn finish(self) {
            drop(self.input);
            self.server.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_parse_error() {
        let mut peer = start_server();
        peer.send("{not json").await;
        let response = peer.recv().await;
        assert_eq!(response["error"]["code"], -32700);
        assert_eq!(response["id"], Value::Null);
        peer.finish().await;
    }

    #[tokio::test]
    async fn test_invalid_version_and_unknown_method() {
        let mut peer = start_server();
        peer.send(r#"{"jsonrpc":"1.0","method":"kill","params":{"channel":"a"},"id":1}"#)
            .await;
        assert_eq!(peer.recv().await["error"]["code"], -32600);

        peer.send(r#"{"jsonrpc":"2.0","method":"write","params":{},"id":2}"#)
            .await;
        let response = peer.recv().await;
        assert_eq!(response["error"]["code"], -32601);
        assert_eq!(response["id"], 2);
        peer.finish().await;
    }

    #[tokio::test]
    async fn test_resize_then_list_sessions() {
        let mut peer = start_server();
        peer.send(r#"{"jsonrpc":"2.0","method":"resize","params":{"channel":"log-1","cols":120,"rows":40},"id":1}"#)
            .await;
        let (response, _) = peer.recv_response(1).await;
        assert_eq!(response["result"], Value::Null);
        assert!(response.get("error").is_none());

        peer.send(r#"{"jsonrpc":"2.0","method":"session.list","id":2}"#).await;
        let (response, _) = peer.recv_response(2).await;
        let sessions = response["result"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["channel"], "log-1");
        assert_eq!(sessions[0]["status"], "idle");
        peer.finish().await;
    }

    #[tokio::test]
    async fn test_dispose_removes_session() {
        let mut peer = start_server();
        peer.send(r#"{"jsonrpc":"2.0","method":"resize","params":{"channel":"log-1","cols":80,"rows":24},"id":1}"#)
            .await;
        peer.recv_response(1).await;

        peer.send(r#"{"jsonrpc":"2.0","method":"dispose","params":{"channel":"log-1"},"id":2}"#)
            .await;
        let (response, _) = peer.recv_response(2).await;
        assert_eq!(response["result"], Value::Null);

        // 释放通过分发任务异步完成
        let mut remaining = usize::MAX;
        for id in 3..50u64 {
            peer.send(&format!(r#"{{"jsonrpc":"2.0","method":"session.list","id":{}}}"#, id))
                .await;
            let (response, _) = peer.recv_response(id).await;
            remaining = response["result"].as_array().unwrap().len();
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(remaining, 0);
        peer.finish().await;
    }

    #[tokio::test]
    async fn test_invalid_params() {
        let mut peer = start_server();
        peer.send(r#"{"jsonrpc":"2.0","method":"exec","params":{"channel":"a"},"id":5}"#)
            .await;
        let response = peer.recv().await;
        assert_eq!(response["error"]["code"], -32602);
        assert_eq!(response["id"], 5);
        peer.finish().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exec_streams_events_before_response() {
        let mut peer = start_server();
        peer.send(r#"{"jsonrpc":"2.0","method":"exec","params":{"channel":"log-1","command":"echo hi"},"id":7}"#)
            .await;
        let (response, notifications) = peer.recv_response(7).await;

        if let Some(error) = response.get("error") {
            println!("PTY creation failed (may be expected in CI): {}", error);
            peer.finish().await;
            return;
        }

        assert_eq!(response["result"]["exit_code"], 0);
        let log = response["result"]["log"].as_str().unwrap().to_string();
        assert!(log.contains("hi"));

        assert_eq!(notifications.first().unwrap()["method"], "executing");
        assert_eq!(notifications.first().unwrap()["params"]["args"][0], true);
        let streamed: String = notifications
            .iter()
            .filter(|n| n["method"] == "data")
            .map(|n| n["params"]["args"][0].as_str().unwrap().to_string())
            .collect();
        assert_eq!(streamed, log);
        peer.finish().await;
    }
}
