//! PTY 会话
//!
//! 一个会话对应一个终端视图，同一时间最多持有一个 Shell 进程。
//! 会话本身可以跨多次执行复用，每次 exec 启动一个新进程。

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use portable_pty::Child;
use std::sync::Arc;
use tokio::sync::watch;

use crate::bridge::message::{ChannelId, ViewSender};
use crate::rpc::types::{ExecConfig, ExecResult, SessionInfo, TermSize};
use crate::utils::error::TerminalError;
use crate::utils::state::ExecStateMachine;

use super::completion::CompletionTracker;
use super::output::{
    start_output_reader, wait_settled, ExecutionDriver, ExitHook, OutputReaderConfig,
};
use super::process::ShellProcess;

/// 正在运行的执行
struct ActiveExec {
    run: u64,
    process: ShellProcess,
    settled: watch::Receiver<Option<ExecResult>>,
}

struct SessionInner {
    state: ExecStateMachine,
    /// 最近一次 resize 的尺寸，新进程以此为初始尺寸
    size: TermSize,
    active: Option<ActiveExec>,
    closed: bool,
}

/// 已启动、尚未返回的执行
pub struct PendingExec {
    channel: ChannelId,
    settled: watch::Receiver<Option<ExecResult>>,
}

impl PendingExec {
    /// 等待本次执行返回
    pub async fn wait(mut self) -> Result<ExecResult, TerminalError> {
        wait_settled(&mut self.settled)
            .await
            .ok_or_else(|| TerminalError::ChannelError(format!("执行结果丢失: {}", self.channel)))
    }
}

/// 回收未交给执行驱动的子进程
fn reap(child: Box<dyn Child + Send + Sync>) {
    tokio::task::spawn_blocking(move || {
        let mut child = child;
        let _ = child.wait();
    });
}

/// PTY 会话
pub struct PtySession {
    channel: ChannelId,
    defaults: ExecConfig,
    read_buffer_size: usize,
    events: ViewSender,
    inner: Arc<Mutex<SessionInner>>,
    created_at: DateTime<Utc>,
}

impl PtySession {
    /// 创建空闲会话（不启动进程）
    pub fn new(channel: ChannelId, defaults: ExecConfig, size: TermSize, events: ViewSender) -> Self {
        let state = ExecStateMachine::new(channel.as_str());
        Self {
            channel,
            defaults,
            read_buffer_size: OutputReaderConfig::default().buffer_size,
            events,
            inner: Arc::new(Mutex::new(SessionInner {
                state,
                size,
                active: None,
                closed: false,
            })),
            created_at: Utc::now(),
        }
    }

    /// 设置 PTY 读取缓冲区大小
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// 在新进程中执行命令
    ///
    /// 返回值在以下任一情况首次发生时确定：
    /// - 满足完成条件（`exit_code` 为 `None`）
    /// - 进程退出（`exit_code` 为退出码）
    ///
    /// 提前返回后进程继续运行，输出继续推送，会话保持 Running 直到进程退出。
    pub async fn exec(&self, command: &str, config: ExecConfig) -> Result<ExecResult, TerminalError> {
        self.start(command, config).await?.wait().await
    }

    /// 启动进程但不等待结果
    ///
    /// 返回时进程已登记为当前执行，之后的 resize / kill / close 都作用于它。
    pub async fn start(&self, command: &str, config: ExecConfig) -> Result<PendingExec, TerminalError> {
        let config = config.merged_over(&self.defaults);
        let tracker = CompletionTracker::new(&config);
        let (slot, settled) = watch::channel(None);

        let (run, size) = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(TerminalError::channel_closed(self.channel.as_str()));
            }
            let run = inner.state.begin()?;
            (run, config.term_size(inner.size))
        };

        // openpty/fork 在阻塞线程中进行，期间不持有会话锁
        let spawned = {
            let command = command.to_string();
            tokio::task::spawn_blocking(move || ShellProcess::spawn(&command, &config, size))
                .await
                .unwrap_or_else(|e| Err(TerminalError::spawn_failed("pty", e)))
        };

        let (mut process, streams) = match spawned {
            Ok(pair) => pair,
            Err(e) => {
                self.inner.lock().state.finish(run, None);
                tracing::error!("会话 {} 启动进程失败: {}", self.channel, e);
                return Err(e);
            }
        };

        {
            let mut inner = self.inner.lock();
            if inner.closed {
                inner.state.finish(run, None);
                drop(inner);
                tracing::info!("会话 {} 已关闭，终止刚启动的进程 (pid: {:?})", self.channel, process.pid());
                drop(process);
                reap(streams.child);
                return Err(TerminalError::channel_closed(self.channel.as_str()));
            }

            // 启动期间收到的 resize
            if inner.size != size {
                if let Err(e) = process.resize(inner.size) {
                    tracing::warn!("会话 {} 调整大小失败: {}", self.channel, e);
                }
            }
            inner.active = Some(ActiveExec {
                run,
                process,
                settled: settled.clone(),
            });
        }

        tracing::info!("会话 {} 执行命令 (run {}): {}", self.channel, run, command);
        if let Err(e) = self.events.send_executing(&self.channel, true) {
            tracing::warn!("发送执行状态失败: {}", e);
        }

        let (chunks, _reader) = start_output_reader(
            self.channel.clone(),
            streams.reader,
            OutputReaderConfig {
                buffer_size: self.read_buffer_size,
                ..Default::default()
            },
        );

        let driver = ExecutionDriver {
            channel: self.channel.clone(),
            events: self.events.clone(),
            tracker,
            slot,
            on_exit: self.exit_hook(run),
        };
        tokio::spawn(driver.run(chunks, streams.child));

        Ok(PendingExec {
            channel: self.channel.clone(),
            settled,
        })
    }

    /// 进程退出时：回到 Idle、释放进程、推送 executing(false)
    fn exit_hook(&self, run: u64) -> ExitHook {
        let inner = Arc::clone(&self.inner);
        let events = self.events.clone();
        let channel = self.channel.clone();

        Box::new(move |exit_code| {
            let (finished, process) = {
                let mut inner = inner.lock();
                let finished = inner.state.finish(run, Some(exit_code));
                let process = if finished { inner.active.take() } else { None };
                (finished, process)
            };
            drop(process);

            if finished {
                if let Err(e) = events.send_executing(&channel, false) {
                    tracing::warn!("发送执行状态失败: {}", e);
                }
            }
        })
    }

    /// 调整终端尺寸
    ///
    /// 记录尺寸供下一个进程使用；有进程运行时同步调整，不中断进程。
    pub fn resize(&self, size: TermSize) {
        let mut inner = self.inner.lock();
        inner.size = size;

        if let Some(active) = inner.active.as_mut() {
            if let Err(e) = active.process.resize(size) {
                tracing::warn!("会话 {} 调整大小失败: {}", self.channel, e);
                return;
            }
            tracing::debug!("调整会话 {} 大小: {}x{}", self.channel, size.cols, size.rows);
        }
    }

    /// 软中断当前进程，并等待本次执行返回
    ///
    /// 空闲时立即返回。中断发送失败时记录警告并立即返回，从不报错。
    pub async fn kill(&self) {
        if let Some(mut settled) = self.interrupt() {
            let _ = wait_settled(&mut settled).await;
        }
    }

    /// 向当前进程发送软中断，不等待
    ///
    /// 返回本次执行结果的接收端；空闲或发送失败时返回 `None`。
    pub fn interrupt(&self) -> Option<watch::Receiver<Option<ExecResult>>> {
        let mut inner = self.inner.lock();
        let active = inner.active.as_mut()?;

        if let Err(e) = active.process.interrupt() {
            tracing::warn!("会话 {} 发送中断失败: {}", self.channel, e);
            return None;
        }
        tracing::info!("会话 {} 发送中断 (run {})", self.channel, active.run);
        Some(active.settled.clone())
    }

    /// 关闭会话并终止进程
    ///
    /// 关闭后的会话拒绝新的执行，包括关闭时仍在启动中的进程。
    pub fn close(&self) {
        let _ = self.interrupt();
        let active = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.active.take()
        };
        if let Some(active) = active {
            tracing::info!("终止会话 {} 的进程 (pid: {:?})", self.channel, active.process.pid());
            drop(active);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().state.is_running()
    }

    /// 最近一次记录的终端尺寸
    pub fn size(&self) -> TermSize {
        self.inner.lock().size
    }

    /// 获取会话信息
    pub fn info(&self) -> SessionInfo {
        let inner = self.inner.lock();
        SessionInfo {
            channel: self.channel.to_string(),
            status: inner.state.status(),
            pid: inner.active.as_ref().and_then(|a| a.process.pid()),
            last_exit_code: inner.state.last_exit_code(),
            created_at: self.created_at,
        }
    }

    /// 替换当前进程的 writer，用于模拟中断发送失败
    #[cfg(test)]
    pub(crate) fn break_active_writer(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.active.as_mut() {
            Some(active) => {
                active.process.break_writer();
                true
            }
            None => false,
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.close();
    }
}
