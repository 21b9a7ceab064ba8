//! PTY 管理模块
//!
//! 负责在伪终端中启动 shell 命令、收集输出并管理执行生命周期。

pub mod completion;
pub mod manager;
pub mod output;
pub mod process;
pub mod session;

pub use completion::{CompletionTracker, Utf8Decoder};
pub use manager::PtyManager;
pub use output::{start_output_reader, OutputReaderConfig};
pub use process::{ShellProcess, INTERRUPT_SEQUENCE};
pub use session::{PendingExec, PtySession};
