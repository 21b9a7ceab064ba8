//! 通道桥接模块
//!
//! 视图端与会话端之间的请求/响应和推送事件通道，与具体传输方式无关。

pub mod client;
pub mod host;
pub mod message;

use tokio::sync::mpsc;

pub use client::{ChannelBridge, DataHandler, ViewClient};
pub use host::{ready_reply, serve, PendingReply, SessionHandler};
pub use message::{ChannelId, Invocation, PushEvent, Reply, ToHost, ToView, ViewSender};

/// 会话端持有的通道两端
pub struct HostChannels {
    /// 视图端发来的请求
    pub requests: mpsc::UnboundedReceiver<ToHost>,
    /// 发往视图端的推送事件和响应
    pub events: ViewSender,
}

/// 创建进程内传输
pub fn local_transport() -> (ViewClient, HostChannels) {
    let (host_tx, host_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = mpsc::unbounded_channel();

    let client = ViewClient::new(host_tx, view_rx);
    let host = HostChannels {
        requests: host_rx,
        events: ViewSender::new(view_tx),
    };
    (client, host)
}
