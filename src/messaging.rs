//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了前台页面与后台上下文之间的消息协议。
//!
//! 两类上下文不共享内存，只能通过持久化存储和本模块的消息通道协作。

use crate::error::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

/// 跨上下文消息
///
/// 线上格式为 `{ "type": "SKIP_WAITING" }` 形式的 JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// 前台 → 后台：立即启用等待中的新版本
    SkipWaiting,
    /// 前台 → 后台：删除所有命名缓存分区
    ClearCache,
    /// 后台 → 前台：请页面执行一次同步
    SyncRequested {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
    },
    /// 后台 → 前台：新版本已接管所有页面
    ControllerChanged { version: String },
}

impl ClientMessage {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// 双向消息通道
#[derive(Clone)]
pub struct MessageBus {
    to_background: broadcast::Sender<ClientMessage>,
    to_clients: broadcast::Sender<ClientMessage>,
}

impl MessageBus {
    pub fn new() -> Self {
        let (to_background, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (to_clients, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            to_background,
            to_clients,
        }
    }

    /// 发往后台上下文，返回接收者数量
    pub fn post_to_background(&self, msg: ClientMessage) -> usize {
        debug!("post to background: {:?}", msg);
        self.to_background.send(msg).unwrap_or(0)
    }

    /// 广播给所有打开的页面，返回接收者数量
    pub fn post_to_clients(&self, msg: ClientMessage) -> usize {
        debug!("post to clients: {:?}", msg);
        self.to_clients.send(msg).unwrap_or(0)
    }

    pub fn subscribe_background(&self) -> broadcast::Receiver<ClientMessage> {
        self.to_background.subscribe()
    }

    pub fn subscribe_clients(&self) -> broadcast::Receiver<ClientMessage> {
        self.to_clients.subscribe()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        assert_eq!(
            ClientMessage::SkipWaiting.to_json().unwrap(),
            r#"{"type":"SKIP_WAITING"}"#
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"CLEAR_CACHE"}"#).unwrap(),
            ClientMessage::ClearCache
        );
        assert_eq!(
            ClientMessage::from_json(r#"{"type":"SYNC_REQUESTED"}"#).unwrap(),
            ClientMessage::SyncRequested { tag: None }
        );
        assert!(ClientMessage::from_json(r#"{"type":"REBOOT"}"#).is_err());
    }

    #[tokio::test]
    async fn test_directions_are_separate() {
        let bus = MessageBus::new();
        let mut bg = bus.subscribe_background();
        let mut pages = bus.subscribe_clients();

        assert_eq!(bus.post_to_background(ClientMessage::ClearCache), 1);
        assert_eq!(bus.post_to_clients(ClientMessage::SyncRequested { tag: None }), 1);

        assert_eq!(bg.recv().await.unwrap(), ClientMessage::ClearCache);
        assert_eq!(
            pages.recv().await.unwrap(),
            ClientMessage::SyncRequested { tag: None }
        );
        assert!(bg.try_recv().is_err());
    }
}
