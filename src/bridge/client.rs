//! 视图端通道
//!
//! [`ViewClient`] 持有到会话端的连接，负责把响应和推送事件分发到各个通道；
//! [`ChannelBridge`] 是单个终端视图使用的句柄，提供 invoke / on_data / dispose。
//!
//! 分发任务按到达顺序处理消息：推送事件先同步交给处理函数，
//! 之后到达的响应才会唤醒等待中的 invoke，因此响应不会越过之前的输出。

use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::rpc::types::{ExecConfig, ExecResult, TermSize};
use crate::utils::error::TerminalError;

use super::message::{ChannelId, Invocation, PushEvent, Reply, ToHost, ToView};

/// 推送事件处理函数
pub type DataHandler = Arc<dyn Fn(&PushEvent) + Send + Sync>;

type Resolver = oneshot::Sender<Result<Reply, TerminalError>>;

/// 单个通道标识的处理函数表
///
/// 分发期间持有锁，释放会等待进行中的分发结束；同一线程内（处理函数中）
/// 注册或释放不会死锁。`None` 表示已释放。
struct ChannelHandlers {
    slot: ReentrantMutex<RefCell<Option<Vec<DataHandler>>>>,
}

impl ChannelHandlers {
    fn new() -> Self {
        Self {
            slot: ReentrantMutex::new(RefCell::new(Some(Vec::new()))),
        }
    }

    fn push(&self, handler: DataHandler) {
        let slot = self.slot.lock();
        let mut handlers = slot.borrow_mut();
        if let Some(handlers) = handlers.as_mut() {
            handlers.push(handler);
        }
    }

    fn deliver(&self, event: &PushEvent) {
        let slot = self.slot.lock();
        let handlers = slot.borrow().clone().unwrap_or_default();
        for handler in handlers {
            if slot.borrow().is_none() {
                break;
            }
            handler(event);
        }
    }

    fn close(&self) {
        let slot = self.slot.lock();
        slot.borrow_mut().take();
    }
}

struct PendingInvoke {
    channel: ChannelId,
    resolver: Resolver,
}

struct ClientShared {
    outbound: mpsc::UnboundedSender<ToHost>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingInvoke>>,
    handlers: Mutex<HashMap<ChannelId, Arc<ChannelHandlers>>>,
    connected: AtomicBool,
}

impl ClientShared {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// 拒绝满足条件的所有等待中的调用
    fn reject_pending(&self, mut matches: impl FnMut(&ChannelId) -> bool, error: impl Fn() -> TerminalError) {
        let rejected: Vec<PendingInvoke> = {
            let mut pending = self.pending.lock();
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, p)| matches(&p.channel))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };

        for invoke in rejected {
            let _ = invoke.resolver.send(Err(error()));
        }
    }
}

/// 视图端连接
pub struct ViewClient {
    shared: Arc<ClientShared>,
    dispatcher: JoinHandle<()>,
}

impl ViewClient {
    /// 创建视图端连接并启动分发任务
    ///
    /// `outbound` 发往会话端，`inbound` 为会话端发来的有序消息流。
    pub fn new(
        outbound: mpsc::UnboundedSender<ToHost>,
        inbound: mpsc::UnboundedReceiver<ToView>,
    ) -> Self {
        let shared = Arc::new(ClientShared {
            outbound,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        });

        let dispatcher = tokio::spawn(dispatch(Arc::clone(&shared), inbound));
        Self { shared, dispatcher }
    }

    /// 打开指定标识的通道
    pub fn open_channel(&self, channel: impl Into<ChannelId>) -> ChannelBridge {
        let channel = channel.into();
        tracing::debug!("打开通道: {}", channel);
        ChannelBridge {
            channel,
            shared: Arc::clone(&self.shared),
            disposed: AtomicBool::new(false),
        }
    }

    /// 打开随机标识的通道
    pub fn open_anonymous_channel(&self) -> ChannelBridge {
        self.open_channel(ChannelId::generate())
    }

    /// 会话端是否仍然连接
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected() && !self.dispatcher.is_finished()
    }

    /// 等待中的调用数量
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }
}

async fn dispatch(shared: Arc<ClientShared>, mut inbound: mpsc::UnboundedReceiver<ToView>) {
    while let Some(message) = inbound.recv().await {
        match message {
            ToView::Event { channel, event } => {
                let handlers = shared.handlers.lock().get(&channel).cloned();
                match handlers {
                    Some(handlers) => handlers.deliver(&event),
                    None => {
                        tracing::trace!("通道 {} 没有处理函数，丢弃 {} 事件", channel, event.method())
                    }
                }
            }
            ToView::Reply { id, result } => {
                let pending = shared.pending.lock().remove(&id);
                match pending {
                    Some(invoke) => {
                        let _ = invoke.resolver.send(result.map_err(TerminalError::from_remote));
                    }
                    None => tracing::debug!("丢弃未知或已放弃的响应 #{}", id),
                }
            }
        }
    }

    tracing::info!("会话端连接已断开");
    shared.connected.store(false, Ordering::SeqCst);
    shared.reject_pending(
        |_| true,
        || TerminalError::ChannelClosed("会话端已断开".to_string()),
    );
}

/// 单个终端视图的通道句柄
///
/// 丢弃时自动释放。
pub struct ChannelBridge {
    channel: ChannelId,
    shared: Arc<ClientShared>,
    disposed: AtomicBool,
}

impl ChannelBridge {
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn closed_error(&self) -> TerminalError {
        TerminalError::channel_closed(self.channel.as_str())
    }

    /// 检查通道是否可用
    fn ensure_open(&self) -> Result<(), TerminalError> {
        if self.is_disposed() {
            return Err(self.closed_error());
        }
        if !self.shared.is_connected() {
            return Err(TerminalError::ChannelClosed("会话端已断开".to_string()));
        }
        Ok(())
    }

    /// 发起一次调用并等待响应
    pub async fn invoke(&self, call: Invocation) -> Result<Reply, TerminalError> {
        self.ensure_open()?;

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (resolver, reply) = oneshot::channel();
        self.shared.pending.lock().insert(
            id,
            PendingInvoke {
                channel: self.channel.clone(),
                resolver,
            },
        );

        // 释放或断开可能发生在登记之前，此时需要自行撤回
        if let Err(e) = self.ensure_open() {
            self.shared.pending.lock().remove(&id);
            return Err(e);
        }

        tracing::debug!("调用 #{} {} on {}", id, call.method(), self.channel);
        let message = ToHost::Invoke {
            id,
            channel: self.channel.clone(),
            call,
        };
        if self.shared.outbound.send(message).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(TerminalError::ChannelClosed("会话端已断开".to_string()));
        }

        reply.await.unwrap_or_else(|_| Err(self.closed_error()))
    }

    /// 以方法名和位置参数发起调用，返回 JSON 结果
    pub async fn invoke_method(
        &self,
        method: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value, TerminalError> {
        self.ensure_open()?;
        let call = Invocation::from_method(method, args)?;
        Ok(self.invoke(call).await?.to_value())
    }

    /// 执行命令
    pub async fn exec(&self, command: &str, config: ExecConfig) -> Result<ExecResult, TerminalError> {
        let call = Invocation::Exec {
            command: command.to_string(),
            config,
        };
        match self.invoke(call).await? {
            Reply::Exec(result) => Ok(result),
            other => Err(TerminalError::ChannelError(format!("exec 收到意外的响应: {:?}", other))),
        }
    }

    /// 调整终端尺寸
    pub async fn resize(&self, size: TermSize) -> Result<(), TerminalError> {
        self.invoke(Invocation::Resize(size)).await.map(|_| ())
    }

    /// 软中断当前进程
    pub async fn kill(&self) -> Result<(), TerminalError> {
        self.invoke(Invocation::Kill).await.map(|_| ())
    }

    /// 注册推送事件处理函数
    ///
    /// 释放后注册的处理函数不会被调用。
    pub fn on_data<F>(&self, handler: F)
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        if self.is_disposed() {
            tracing::warn!("通道 {} 已释放，忽略处理函数注册", self.channel);
            return;
        }
        let handlers = Arc::clone(
            self.shared
                .handlers
                .lock()
                .entry(self.channel.clone())
                .or_insert_with(|| Arc::new(ChannelHandlers::new())),
        );
        handlers.push(Arc::new(handler));
    }

    /// 释放通道
    ///
    /// 注销该通道标识的所有处理函数，拒绝等待中的调用，并通知会话端关闭会话。
    /// 返回后处理函数不再被调用。重复调用无副作用。
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let handlers = self.shared.handlers.lock().remove(&self.channel);
        if let Some(handlers) = handlers {
            handlers.close();
        }
        self.shared
            .reject_pending(|channel| channel == &self.channel, || self.closed_error());

        let message = ToHost::Dispose {
            channel: self.channel.clone(),
        };
        if self.shared.outbound.send(message).is_err() {
            tracing::debug!("会话端已断开，跳过释放通知: {}", self.channel);
        }
        tracing::info!("释放通道: {}", self.channel);
    }
}

impl Drop for ChannelBridge {
    fn drop(&mut self) {
        self.dispose();
    }
}
