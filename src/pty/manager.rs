//! PTY 管理器
//!
//! 按通道标识管理会话：首次调用时创建，通道释放时关闭。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::bridge::host::{ready_reply, PendingReply, SessionHandler};
use crate::bridge::message::{ChannelId, Invocation, Reply, ViewSender};
use crate::config::BridgeConfig;
use crate::rpc::types::{ExecConfig, SessionInfo, TermSize};
use crate::utils::error::TerminalError;

use super::output::wait_settled;
use super::session::PtySession;

/// 关闭时等待进程响应中断的时长
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// PTY 管理器
pub struct PtyManager {
    /// 会话映射表
    sessions: Mutex<HashMap<ChannelId, Arc<PtySession>>>,
    /// 新会话的默认执行配置
    defaults: ExecConfig,
    /// 新会话的初始尺寸
    term_size: TermSize,
    read_buffer_size: usize,
    /// 推送事件发送器
    events: ViewSender,
}

impl PtyManager {
    /// 创建新的 PTY 管理器
    pub fn new(config: &BridgeConfig, events: ViewSender) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            defaults: config.exec_defaults(),
            term_size: config.term_size,
            read_buffer_size: config.read_buffer_size,
            events,
        }
    }

    /// 获取通道对应的会话，不存在时创建
    pub async fn session(&self, channel: &ChannelId) -> Arc<PtySession> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(channel) {
            return Arc::clone(session);
        }

        let session = Arc::new(
            PtySession::new(
                channel.clone(),
                self.defaults.clone(),
                self.term_size,
                self.events.clone(),
            )
            .with_read_buffer_size(self.read_buffer_size),
        );
        sessions.insert(channel.clone(), Arc::clone(&session));
        tracing::info!("创建会话: {}", channel);
        session
    }

    /// 获取已存在的会话
    pub async fn get_session(&self, channel: &ChannelId) -> Option<Arc<PtySession>> {
        self.sessions.lock().await.get(channel).cloned()
    }

    /// 关闭会话
    pub async fn close_session(&self, channel: &ChannelId) -> Result<(), TerminalError> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(channel)
            .ok_or_else(|| TerminalError::SessionNotFound(channel.to_string()))?;

        session.close();
        tracing::info!("关闭会话: {}", channel);
        Ok(())
    }

    /// 列出所有会话
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .lock()
            .await
            .values()
            .map(|s| s.info())
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.channel.cmp(&b.channel)));
        infos
    }

    /// 获取会话数量
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// 关闭所有会话
    ///
    /// 先中断所有运行中的进程并等待一小段时间，再强制终止。
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<PtySession>> = self
            .sessions
            .lock()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();
        if sessions.is_empty() {
            return;
        }

        tracing::info!("关闭 {} 个会话", sessions.len());
        let kills = futures::future::join_all(sessions.iter().map(|s| s.kill()));
        if tokio::time::timeout(SHUTDOWN_GRACE, kills).await.is_err() {
            tracing::warn!("部分进程未响应中断，强制终止");
        }

        for session in &sessions {
            session.close();
        }
    }
}

#[async_trait]
impl SessionHandler for PtyManager {
    async fn invoke(&self, channel: &ChannelId, call: Invocation) -> Result<PendingReply, TerminalError> {
        match call {
            Invocation::Exec { command, config } => {
                let pending = self.session(channel).await.start(&command, config).await?;
                Ok(Box::pin(async move { pending.wait().await.map(Reply::Exec) }))
            }
            Invocation::Resize(size) => {
                self.session(channel).await.resize(size);
                Ok(ready_reply(Reply::Done))
            }
            Invocation::Kill => {
                let settled = match self.get_session(channel).await {
                    Some(session) => session.interrupt(),
                    None => None,
                };
                Ok(Box::pin(async move {
                    if let Some(mut settled) = settled {
                        let _ = wait_settled(&mut settled).await;
                    }
                    Ok(Reply::Done)
                }))
            }
        }
    }

    async fn dispose(&self, channel: &ChannelId) {
        if let Err(e) = self.close_session(channel).await {
            tracing::debug!("释放通道 {}: {}", channel, e);
        }
    }
}
