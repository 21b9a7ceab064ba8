//! PTY 输出读取器与执行驱动
//!
//! 读取器在阻塞线程中读取 PTY 输出并转发到异步通道；
//! 执行驱动负责累积日志、推送 data 事件、判断提前完成条件，
//! 并在进程退出后交付最终结果。

use portable_pty::Child;
use std::io::Read;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::bridge::message::{ChannelId, ViewSender};
use crate::rpc::types::ExecResult;

use super::completion::{CompletionTracker, Utf8Decoder};

/// 输出读取器配置
pub struct OutputReaderConfig {
    /// 读取缓冲区大小
    pub buffer_size: usize,
    /// 无数据可读时的重试间隔
    pub idle_backoff: Duration,
}

impl Default for OutputReaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            idle_backoff: Duration::from_millis(10),
        }
    }
}

/// 执行结果槽位，最多写入一次
pub type ResultSlot = watch::Sender<Option<ExecResult>>;

/// 写入执行结果，仅第一次写入生效
pub fn settle(slot: &ResultSlot, result: ExecResult) -> bool {
    slot.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(result);
            true
        } else {
            false
        }
    })
}

/// 等待执行结果
///
/// 结果槽位在写入前被丢弃时返回 `None`。
pub async fn wait_settled(rx: &mut watch::Receiver<Option<ExecResult>>) -> Option<ExecResult> {
    let slot = rx.wait_for(Option::is_some).await.ok()?;
    (*slot).clone()
}

/// 启动 PTY 输出读取器
///
/// 在阻塞线程中读取输出，每次读到的数据原样发送到返回的通道。
/// 读到 EOF 或出错时通道关闭。
pub fn start_output_reader(
    channel: ChannelId,
    reader: Box<dyn Read + Send>,
    config: OutputReaderConfig,
) -> (mpsc::UnboundedReceiver<Vec<u8>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let task_handle = tokio::task::spawn_blocking(move || {
        let mut reader = reader;
        let mut buffer = vec![0u8; config.buffer_size];

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => {
                    tracing::debug!("PTY 输出 EOF: {}", channel);
                    break;
                }
                Ok(n) => {
                    tracing::trace!("读取 PTY 输出: {} bytes", n);
                    if tx.send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(config.idle_backoff);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    continue;
                }
                Err(e) => {
                    // 子进程退出后 Linux 上读取 master 会返回 EIO
                    tracing::debug!("PTY 输出结束: {} ({})", channel, e);
                    break;
                }
            }
        }

        tracing::debug!("输出读取器退出: {}", channel);
    });

    (rx, task_handle)
}

/// 进程退出回调，参数为退出码
pub type ExitHook = Box<dyn FnOnce(i32) + Send>;

/// 执行驱动
pub struct ExecutionDriver {
    pub channel: ChannelId,
    pub events: ViewSender,
    pub tracker: CompletionTracker,
    pub slot: ResultSlot,
    pub on_exit: ExitHook,
}

impl ExecutionDriver {
    /// 驱动一次执行直到进程退出
    ///
    /// 每段输出依次：追加到日志、推送 data 事件、检查完成条件。
    /// 进程退出时先调用 `on_exit`，再交付 `{exit_code, log}`。
    pub async fn run(
        mut self,
        mut chunks: mpsc::UnboundedReceiver<Vec<u8>>,
        child: Box<dyn Child + Send + Sync>,
    ) {
        let mut decoder = Utf8Decoder::new();
        while let Some(bytes) = chunks.recv().await {
            let text = decoder.decode(&bytes);
            self.emit(&text);
        }
        let rest = decoder.finish();
        self.emit(&rest);

        let exit_code = wait_child(child).await;
        tracing::info!("进程退出: {} (exit code: {})", self.channel, exit_code);

        let ExecutionDriver {
            tracker,
            slot,
            on_exit,
            ..
        } = self;
        on_exit(exit_code);
        settle(&slot, tracker.exit_result(exit_code));
    }

    fn emit(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }

        let resolved = self.tracker.push(text);
        if let Err(e) = self.events.send_data(&self.channel, text) {
            tracing::error!("发送输出事件失败: {}", e);
        }
        if resolved {
            tracing::debug!("满足完成条件，提前返回: {}", self.channel);
            settle(&self.slot, self.tracker.early_result());
        }
    }
}

async fn wait_child(mut child: Box<dyn Child + Send + Sync>) -> i32 {
    match tokio::task::spawn_blocking(move || child.wait()).await {
        Ok(Ok(status)) => status.exit_code() as i32,
        Ok(Err(e)) => {
            tracing::error!("等待进程退出失败: {}", e);
            -1
        }
        Err(e) => {
            tracing::error!("等待进程任务异常: {}", e);
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::message::{PushEvent, ToView};
    use crate::rpc::types::{ExecConfig, LogPattern};
    use std::io::Cursor;

    fn collect_data(rx: &mut mpsc::UnboundedReceiver<ToView>) -> Vec<String> {
        let mut chunks = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let ToView::Event {
                event: PushEvent::Data(chunk),
                ..
            } = message
            {
                chunks.push(chunk);
            }
        }
        chunks
    }

    #[tokio::test]
    async fn test_output_reader_with_data() {
        let reader: Box<dyn Read + Send> = Box::new(Cursor::new(b"Hello, World!".to_vec()));
        let (mut rx, handle) =
            start_output_reader(ChannelId::from("test"), reader, OutputReaderConfig::default());

        let chunk = rx.recv().await.expect("should receive output");
        assert_eq!(chunk, b"Hello, World!");
        assert!(rx.recv().await.is_none(), "channel closes at EOF");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_output_reader_eof() {
        let reader: Box<dyn Read + Send> = Box::new(Cursor::new(Vec::new()));
        let (mut rx, handle) =
            start_output_reader(ChannelId::from("test"), reader, OutputReaderConfig::default());

        assert!(rx.recv().await.is_none());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_output_reader_small_buffer() {
        let reader: Box<dyn Read + Send> = Box::new(Cursor::new(b"abcdef".to_vec()));
        let config = OutputReaderConfig {
            buffer_size: 2,
            ..Default::default()
        };
        let (mut rx, _handle) = start_output_reader(ChannelId::from("test"), reader, config);

        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            assert!(chunk.len() <= 2);
            received.extend(chunk);
        }
        assert_eq!(received, b"abcdef");
    }

    #[test]
    fn test_settle_only_first_wins() {
        let (slot, rx) = watch::channel(None);
        let early = ExecResult {
            exit_code: None,
            log: "ready".to_string(),
        };
        let exit = ExecResult {
            exit_code: Some(0),
            log: "ready\ndone".to_string(),
        };

        assert!(settle(&slot, early.clone()));
        assert!(!settle(&slot, exit));
        assert_eq!(*rx.borrow(), Some(early));
    }

    #[tokio::test]
    async fn test_wait_settled_after_drop_without_result() {
        let (slot, mut rx) = watch::channel(None);
        drop(slot);
        assert!(wait_settled(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_driver_emit_resolves_early_after_data() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let (slot, rx) = watch::channel(None);
        let config = ExecConfig {
            resolve_on_log: Some(LogPattern::new("listening on port \\d+").unwrap()),
            ..Default::default()
        };
        let mut driver = ExecutionDriver {
            channel: ChannelId::from("server"),
            events: ViewSender::new(tx),
            tracker: CompletionTracker::new(&config),
            slot,
            on_exit: Box::new(|_| {}),
        };

        driver.emit("booting\r\n");
        assert!(rx.borrow().is_none());

        driver.emit("listening on port 4000\r\n");
        let settled = rx.borrow().clone().expect("resolved early");
        assert_eq!(settled.exit_code, None);
        assert_eq!(settled.log, "booting\r\nlistening on port 4000\r\n");

        // 提前完成之后继续推送输出
        driver.emit("GET /\r\n");
        assert_eq!(
            collect_data(&mut events),
            ["booting\r\n", "listening on port 4000\r\n", "GET /\r\n"]
        );
        assert_eq!(rx.borrow().clone().unwrap().log, settled.log);
    }
}
