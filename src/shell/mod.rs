//! Shell 集成模块
//!
//! 负责 Shell 检测和启动参数解析。

pub mod detect;
pub mod launch;

pub use detect::{detect_default_shell, shell_family, ShellFamily};
pub use launch::{resolve_launch, Platform, ShellLaunch};
