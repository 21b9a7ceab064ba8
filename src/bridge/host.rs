//! 会话端分发
//!
//! 从请求通道读取视图端消息，交给 [`SessionHandler`] 处理，
//! 响应与推送事件写入同一个有序的视图通道。

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::rpc::types::JsonRpcError;
use crate::utils::error::TerminalError;

use super::message::{ChannelId, Invocation, Reply, ToHost, ViewSender};

/// 已受理、尚未完成的调用
pub type PendingReply = BoxFuture<'static, Result<Reply, TerminalError>>;

/// 立即完成的响应
pub fn ready_reply(reply: Reply) -> PendingReply {
    Box::pin(futures::future::ready(Ok(reply)))
}

/// 会话端处理器
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    /// 受理一次调用
    ///
    /// 受理按消息到达顺序依次进行，返回之前不会处理下一条消息；
    /// 返回的 future 在独立任务中完成，不阻塞后续消息。
    /// 受理失败时直接作为响应返回。
    async fn invoke(&self, channel: &ChannelId, call: Invocation) -> Result<PendingReply, TerminalError>;

    /// 视图端释放通道
    async fn dispose(&self, channel: &ChannelId);
}

/// 启动会话端分发任务
///
/// 请求和释放通知按到达顺序受理，长时间运行的 exec 只在完成阶段等待，
/// 不会阻塞同一通道上随后的 kill。请求通道关闭时任务退出。
pub fn serve<H: SessionHandler>(
    handler: Arc<H>,
    mut requests: mpsc::UnboundedReceiver<ToHost>,
    replies: ViewSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = requests.recv().await {
            match message {
                ToHost::Invoke { id, channel, call } => {
                    tracing::debug!("收到调用 #{} {} on {}", id, call.method(), channel);
                    match handler.invoke(&channel, call).await {
                        Ok(pending) => {
                            let replies = replies.clone();
                            tokio::spawn(async move {
                                let result = pending.await.map_err(JsonRpcError::from);
                                if let Err(e) = replies.send_reply(id, result) {
                                    tracing::warn!("发送响应 #{} 失败: {}", id, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::debug!("调用 #{} 受理失败: {}", id, e);
                            if let Err(e) = replies.send_reply(id, Err(e.into())) {
                                tracing::warn!("发送响应 #{} 失败: {}", id, e);
                            }
                        }
                    }
                }
                ToHost::Dispose { channel } => {
                    tracing::debug!("释放通道: {}", channel);
                    handler.dispose(&channel).await;
                }
            }
        }

        tracing::debug!("请求通道关闭，会话端分发退出");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::message::ToView;
    use crate::rpc::types::{ExecResult, TermSize};
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Recorder {
        admitted: Mutex<Vec<String>>,
        disposed: Mutex<Vec<ChannelId>>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl SessionHandler for Recorder {
        async fn invoke(&self, channel: &ChannelId, call: Invocation) -> Result<PendingReply, TerminalError> {
            self.admitted.lock().push(format!("{} {}", call.method(), channel));
            match call {
                Invocation::Exec { command, .. } if command == "hang" => {
                    let release = Arc::clone(&self.release);
                    Ok(Box::pin(async move {
                        release.notified().await;
                        Ok(Reply::Exec(ExecResult {
                            exit_code: Some(130),
                            log: String::new(),
                        }))
                    }))
                }
                Invocation::Exec { command, .. } => Ok(ready_reply(Reply::Exec(ExecResult {
                    exit_code: Some(0),
                    log: format!("{}: {}", channel, command),
                }))),
                Invocation::Resize(_) => Ok(ready_reply(Reply::Done)),
                Invocation::Kill if channel.as_str() == "b" => {
                    Err(TerminalError::SessionNotFound(channel.to_string()))
                }
                Invocation::Kill => {
                    self.release.notify_one();
                    Ok(ready_reply(Reply::Done))
                }
            }
        }

        async fn dispose(&self, channel: &ChannelId) {
            self.admitted.lock().push(format!("dispose {}", channel));
            self.disposed.lock().push(channel.clone());
        }
    }

    fn exec(id: u64, channel: &str, command: &str) -> ToHost {
        ToHost::Invoke {
            id,
            channel: ChannelId::from(channel),
            call: Invocation::Exec {
                command: command.to_string(),
                config: Default::default(),
            },
        }
    }

    #[tokio::test]
    async fn test_serve_replies_and_disposes() {
        let handler = Arc::new(Recorder::default());
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (view_tx, mut view_rx) = mpsc::unbounded_channel();
        let task = serve(Arc::clone(&handler), req_rx, ViewSender::new(view_tx));

        req_tx.send(exec(1, "a", "ls")).unwrap();

        match view_rx.recv().await.unwrap() {
            ToView::Reply { id, result } => {
                assert_eq!(id, 1);
                match result.unwrap() {
                    Reply::Exec(r) => assert_eq!(r.log, "a: ls"),
                    other => panic!("unexpected reply {:?}", other),
                }
            }
            other => panic!("unexpected message {:?}", other),
        }

        req_tx
            .send(ToHost::Invoke {
                id: 2,
                channel: ChannelId::from("b"),
                call: Invocation::Kill,
            })
            .unwrap();
        match view_rx.recv().await.unwrap() {
            ToView::Reply { id: 2, result } => {
                let err = result.unwrap_err();
                assert_eq!(err.code, -32001);
            }
            other => panic!("unexpected message {:?}", other),
        }

        req_tx.send(ToHost::Dispose { channel: ChannelId::from("a") }).unwrap();
        drop(req_tx);
        task.await.unwrap();
        assert_eq!(*handler.disposed.lock(), vec![ChannelId::from("a")]);
    }

    #[tokio::test]
    async fn test_admission_follows_arrival_order() {
        let handler = Arc::new(Recorder::default());
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (view_tx, _view_rx) = mpsc::unbounded_channel();

        req_tx
            .send(ToHost::Invoke {
                id: 1,
                channel: ChannelId::from("a"),
                call: Invocation::Resize(TermSize::new(120, 40)),
            })
            .unwrap();
        req_tx.send(exec(2, "a", "make")).unwrap();
        req_tx
            .send(ToHost::Invoke {
                id: 3,
                channel: ChannelId::from("a"),
                call: Invocation::Kill,
            })
            .unwrap();
        req_tx.send(ToHost::Dispose { channel: ChannelId::from("a") }).unwrap();
        drop(req_tx);

        serve(Arc::clone(&handler), req_rx, ViewSender::new(view_tx))
            .await
            .unwrap();
        assert_eq!(
            *handler.admitted.lock(),
            vec!["resize a", "exec a", "kill a", "dispose a"]
        );
    }

    #[tokio::test]
    async fn test_pending_exec_does_not_block_kill() {
        let handler = Arc::new(Recorder::default());
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (view_tx, mut view_rx) = mpsc::unbounded_channel();
        let _task = serve(Arc::clone(&handler), req_rx, ViewSender::new(view_tx));

        req_tx.send(exec(1, "a", "hang")).unwrap();
        req_tx
            .send(ToHost::Invoke {
                id: 2,
                channel: ChannelId::from("a"),
                call: Invocation::Kill,
            })
            .unwrap();

        let mut order = Vec::new();
        for _ in 0..2 {
            match view_rx.recv().await.unwrap() {
                ToView::Reply { id, result } => {
                    assert!(result.is_ok());
                    order.push(id);
                }
                other => panic!("unexpected message {:?}", other),
            }
        }
        order.sort_unstable();
        assert_eq!(order, vec![1, 2]);
    }
}
