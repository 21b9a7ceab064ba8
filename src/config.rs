//! 宿主配置
//!
//! 提供会话默认值，可通过环境变量覆盖：
//! - `PTY_BRIDGE_SHELL`: 默认 shell
//! - `PTY_BRIDGE_CWD`: 默认工作目录
//! - `PTY_BRIDGE_COLS` / `PTY_BRIDGE_ROWS`: 默认终端尺寸
//! - `PTY_BRIDGE_TERM`: TERM 环境变量

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::rpc::types::{ExecConfig, TermSize};

/// 宿主配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    /// 默认 shell（为空时自动检测）
    pub shell: Option<String>,
    /// 默认工作目录
    pub cwd: Option<String>,
    /// 新进程的默认尺寸
    pub term_size: TermSize,
    /// TERM 环境变量
    pub term: String,
    /// PTY 读取缓冲区大小
    pub read_buffer_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            shell: None,
            cwd: dirs::home_dir().map(|p| p.to_string_lossy().to_string()),
            term_size: TermSize::default(),
            term: "xterm-256color".to_string(),
            read_buffer_size: 4096,
        }
    }
}

impl BridgeConfig {
    /// 从进程环境变量加载
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// 从给定的变量集合加载，未设置的项保持默认值
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let mut config = Self::default();

        if let Some(shell) = non_empty(&vars, "PTY_BRIDGE_SHELL") {
            config.shell = Some(shell);
        }
        if let Some(cwd) = non_empty(&vars, "PTY_BRIDGE_CWD") {
            config.cwd = Some(cwd);
        }
        if let Some(term) = non_empty(&vars, "PTY_BRIDGE_TERM") {
            config.term = term;
        }
        if let Some(cols) = parse_dimension(&vars, "PTY_BRIDGE_COLS") {
            config.term_size.cols = cols;
        }
        if let Some(rows) = parse_dimension(&vars, "PTY_BRIDGE_ROWS") {
            config.term_size.rows = rows;
        }

        config
    }

    /// 转换为会话默认执行配置
    ///
    /// 尺寸不写入默认配置，由会话记录的最近尺寸决定。
    pub fn exec_defaults(&self) -> ExecConfig {
        ExecConfig {
            shell: self.shell.clone(),
            cwd: self.cwd.clone(),
            env: Some(HashMap::from([("TERM".to_string(), self.term.clone())])),
            ..Default::default()
        }
    }
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key).filter(|v| !v.trim().is_empty()).cloned()
}

fn parse_dimension(vars: &HashMap<String, String>, key: &str) -> Option<u16> {
    let raw = non_empty(vars, key)?;
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => {
            tracing::warn!("忽略无效的配置项 {}={}", key, raw);
            None
        }
        Ok(value) => Some(value),
    }
}
