//! 执行状态管理
//!
//! 会话在 Idle / Running 两个状态之间转换，同一时间最多只有一次执行。
//!
//! ## 功能
//! - 定义有效的状态转换规则
//! - 为每次执行分配递增的执行编号，过期的完成通知会被忽略
//! - 记录状态变更日志

use crate::rpc::types::ExecStatus;
use crate::utils::error::TerminalError;

/// 状态转换结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateTransitionResult {
    /// 转换成功
    Success,
    /// 转换无效（当前状态不允许转换到目标状态）
    Invalid {
        from: ExecStatus,
        to: ExecStatus,
        reason: String,
    },
}

impl StateTransitionResult {
    /// 检查转换是否成功
    pub fn is_success(&self) -> bool {
        matches!(self, StateTransitionResult::Success)
    }

    /// 检查转换是否失败
    pub fn is_invalid(&self) -> bool {
        matches!(self, StateTransitionResult::Invalid { .. })
    }
}

/// 执行状态机
#[derive(Debug, Clone)]
pub struct ExecStateMachine {
    /// 当前状态
    current_status: ExecStatus,
    /// 会话 ID（用于日志）
    session_id: String,
    /// 当前（或最近一次）执行编号
    run: u64,
    /// 最近一次进程退出码
    last_exit_code: Option<i32>,
}

impl ExecStateMachine {
    /// 创建新的状态机，初始为 Idle
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            current_status: ExecStatus::Idle,
            session_id: session_id.into(),
            run: 0,
            last_exit_code: None,
        }
    }

    /// 获取当前状态
    pub fn status(&self) -> ExecStatus {
        self.current_status
    }

    pub fn is_running(&self) -> bool {
        self.current_status == ExecStatus::Running
    }

    /// 最近一次进程退出码
    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit_code
    }

    /// 当前执行编号
    pub fn current_run(&self) -> u64 {
        self.run
    }

    /// 检查状态转换是否有效
    ///
    /// 状态转换规则：
    /// - Idle -> Running
    /// - Running -> Idle
    pub fn is_valid_transition(from: ExecStatus, to: ExecStatus) -> bool {
        matches!(
            (from, to),
            (ExecStatus::Idle, ExecStatus::Running) | (ExecStatus::Running, ExecStatus::Idle)
        )
    }

    /// 尝试转换到目标状态
    ///
    /// 如果转换有效，更新状态并返回 Success。
    /// 如果转换无效，保持当前状态并返回 Invalid。
    pub fn transition_to(&mut self, target: ExecStatus) -> StateTransitionResult {
        let from = self.current_status;
        if Self::is_valid_transition(from, target) {
            self.current_status = target;
            tracing::debug!(
                "会话 {} 状态转换: {:?} -> {:?}",
                self.session_id,
                from,
                target
            );
            StateTransitionResult::Success
        } else {
            let reason = match from {
                ExecStatus::Running => "已有进程正在运行".to_string(),
                ExecStatus::Idle => "没有正在运行的进程".to_string(),
            };
            tracing::warn!(
                "会话 {} 无效状态转换: {:?} -> {:?}, 原因: {}",
                self.session_id,
                from,
                target,
                reason
            );
            StateTransitionResult::Invalid {
                from,
                to: target,
                reason,
            }
        }
    }

    /// 开始一次新的执行，返回执行编号
    ///
    /// Running 时拒绝，返回 `SessionBusy`。
    pub fn begin(&mut self) -> Result<u64, TerminalError> {
        if self.transition_to(ExecStatus::Running).is_invalid() {
            return Err(TerminalError::session_busy(&self.session_id));
        }
        self.run += 1;
        Ok(self.run)
    }

    /// 结束编号为 `run` 的执行
    ///
    /// 编号不是当前执行或状态不是 Running 时返回 `false`。
    pub fn finish(&mut self, run: u64, exit_code: Option<i32>) -> bool {
        if run != self.run || !self.is_running() {
            return false;
        }
        if exit_code.is_some() {
            self.last_exit_code = exit_code;
        }
        self.transition_to(ExecStatus::Idle).is_success()
    }
}

impl Default for ExecStateMachine {
    fn default() -> Self {
        Self::new("unknown")
    }
}
