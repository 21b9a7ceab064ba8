//! PTY Bridge 宿主进程入口点
//!
//! 该程序作为独立进程运行，通过 stdin/stdout 与前端进行 JSON-RPC 通信。
//! 主要功能：
//! - 按通道标识管理 PTY 会话
//! - 执行命令并推送输出
//! - JSON-RPC 2.0 协议通信

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pty_bridge::config::BridgeConfig;
use pty_bridge::rpc::RpcServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统，输出到 stderr 避免干扰 JSON-RPC 通信
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BridgeConfig::from_env();
    tracing::info!(
        "PTY Bridge 启动 (shell: {:?}, cwd: {:?}, {}x{})",
        config.shell,
        config.cwd,
        config.term_size.cols,
        config.term_size.rows
    );

    let server = RpcServer::new(config);
    server.run().await?;

    Ok(())
}
