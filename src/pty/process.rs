//! Shell 进程
//!
//! 使用 portable-pty 在伪终端中启动单个 shell 命令。
//! 每个实例对应且仅对应一个 OS 进程，进程退出后不可复用。

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};

use crate::rpc::types::{ExecConfig, TermSize};
use crate::shell::{detect_default_shell, resolve_launch, Platform, ShellLaunch};
use crate::utils::error::TerminalError;

/// 软中断字节序列：Ctrl+C 后跟回车
pub const INTERRUPT_SEQUENCE: [u8; 2] = [0x03, 0x0d];

/// 进程的输出流和子进程句柄，交给输出驱动任务独占
pub struct ProcessStreams {
    pub reader: Box<dyn Read + Send>,
    pub child: Box<dyn Child + Send + Sync>,
}

/// Shell 进程
pub struct ShellProcess {
    /// PTY master
    master: Box<dyn MasterPty + Send>,
    /// PTY writer
    writer: Box<dyn Write + Send>,
    /// 用于会话销毁时终止进程
    killer: Box<dyn ChildKiller + Send + Sync>,
    /// 启动命令
    launch: ShellLaunch,
    pid: Option<u32>,
    size: TermSize,
}

impl ShellProcess {
    /// 在新的 PTY 中启动 `command`
    ///
    /// `config` 中的 shell、参数、工作目录、环境变量覆盖默认值，
    /// `size` 为初始终端尺寸。
    pub fn spawn(
        command: &str,
        config: &ExecConfig,
        size: TermSize,
    ) -> Result<(Self, ProcessStreams), TerminalError> {
        let launch = resolve_launch(
            Platform::current(),
            &detect_default_shell(),
            config.shell.as_deref(),
            config.args.as_deref(),
            command,
        );

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(pty_size(size))
            .map_err(|e| TerminalError::spawn_failed(&launch.program, e))?;

        let mut cmd = CommandBuilder::new(&launch.program);
        cmd.args(&launch.args);

        if let Some(dir) = &config.cwd {
            cmd.cwd(dir);
        }

        if let Some(env_vars) = &config.env {
            for (key, value) in env_vars {
                cmd.env(key, value);
            }
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::spawn_failed(&launch.program, e))?;

        // 释放 slave 端，子进程退出后 reader 才能读到 EOF
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::spawn_failed(&launch.program, e))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::spawn_failed(&launch.program, e))?;

        let pid = child.process_id();
        let killer = child.clone_killer();

        tracing::info!(
            "启动进程: {} {:?} (pid: {:?}, {}x{})",
            launch.program,
            launch.args,
            pid,
            size.cols,
            size.rows
        );

        Ok((
            Self {
                master: pair.master,
                writer,
                killer,
                launch,
                pid,
                size,
            },
            ProcessStreams { reader, child },
        ))
    }

    /// 写入数据到 PTY
    pub fn write(&mut self, data: &[u8]) -> Result<(), TerminalError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// 发送软中断
    ///
    /// 相当于用户按下中断键，不保证进程一定退出。
    pub fn interrupt(&mut self) -> Result<(), TerminalError> {
        self.write(&INTERRUPT_SEQUENCE)
            .map_err(|e| TerminalError::InterruptFailed(e.to_string()))
    }

    /// 调整 PTY 大小，不中断进程
    pub fn resize(&mut self, size: TermSize) -> Result<(), TerminalError> {
        self.master.resize(pty_size(size)).map_err(|e| {
            TerminalError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                e.to_string(),
            ))
        })?;
        self.size = size;
        Ok(())
    }

    pub fn launch(&self) -> &ShellLaunch {
        &self.launch
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn size(&self) -> TermSize {
        self.size
    }

    /// 替换 writer，用于模拟中断发送失败
    #[cfg(test)]
    pub(crate) fn break_writer(&mut self) {
        struct BrokenWriter;

        impl Write for BrokenWriter {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "writer closed"))
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        self.writer = Box::new(BrokenWriter);
    }
}

impl Drop for ShellProcess {
    fn drop(&mut self) {
        // 进程可能已经退出，忽略错误
        let _ = self.killer.kill();
    }
}

fn pty_size(size: TermSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}
