//! 执行日志与完成条件
//!
//! 累积单次执行的输出，并判断是否满足提前完成条件
//! （首段输出 / 累积输出匹配模式）。

use crate::rpc::types::{ExecConfig, ExecResult, LogPattern};

/// 增量 UTF-8 解码器
///
/// PTY 读取可能在多字节字符中间截断，未完成的尾部字节留到下一次解码。
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 解码一段字节，返回当前可确定的文本
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // 尾部不完整，等待后续字节
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }

        out
    }

    /// 输出结束时取出剩余字节
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).to_string();
        self.pending.clear();
        rest
    }
}

/// 单次执行的完成跟踪器
#[derive(Debug)]
pub struct CompletionTracker {
    log: String,
    resolve_on_first_log: bool,
    resolve_on_log: Option<LogPattern>,
    resolved: bool,
}

impl CompletionTracker {
    pub fn new(config: &ExecConfig) -> Self {
        Self {
            log: String::new(),
            resolve_on_first_log: config.resolve_on_first_log,
            resolve_on_log: config.resolve_on_log.clone(),
            resolved: false,
        }
    }

    /// 追加一段输出
    ///
    /// 仅在完成条件第一次成立时返回 `true`。
    pub fn push(&mut self, chunk: &str) -> bool {
        self.log.push_str(chunk);
        if self.resolved {
            return false;
        }

        let hit = self.resolve_on_first_log
            || self
                .resolve_on_log
                .as_ref()
                .map_or(false, |pattern| pattern.is_match(&self.log));
        if hit {
            self.resolved = true;
        }
        hit
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// 提前完成时的结果（无退出码）
    pub fn early_result(&self) -> ExecResult {
        ExecResult {
            exit_code: None,
            log: self.log.clone(),
        }
    }

    /// 进程退出时的结果
    pub fn exit_result(self, exit_code: i32) -> ExecResult {
        ExecResult {
            exit_code: Some(exit_code),
            log: self.log,
        }
    }
}
