//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了尽力而为的后台唤醒能力。
//!
//! 平台不支持时协调器只依赖定时器触发。

use crate::error::Result;
use crate::messaging::{ClientMessage, MessageBus};
use async_trait::async_trait;
use dashmap::DashSet;
use tracing::{debug, info};

/// 后台唤醒能力
#[async_trait]
pub trait BackgroundSync: Send + Sync {
    /// 以标签申请一次后台唤醒
    async fn register(&self, tag: &str) -> Result<()>;
}

/// 后台上下文一侧的唤醒登记表
///
/// 平台唤醒后台上下文时调用 [`BackgroundWakeRegistry::fire`]，
/// 由它通知所有打开的页面执行一次同步
pub struct BackgroundWakeRegistry {
    pending: DashSet<String>,
    bus: MessageBus,
}

impl BackgroundWakeRegistry {
    pub fn new(bus: MessageBus) -> Self {
        Self {
            pending: DashSet::new(),
            bus,
        }
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.pending.contains(tag)
    }

    /// 处理平台的唤醒事件，返回收到通知的页面数
    pub fn fire(&self, tag: &str) -> usize {
        if self.pending.remove(tag).is_none() {
            debug!("wake for unregistered tag '{}' ignored", tag);
            return 0;
        }
        let delivered = self.bus.post_to_clients(ClientMessage::SyncRequested {
            tag: Some(tag.to_string()),
        });
        info!("background wake '{}' forwarded to {} pages", tag, delivered);
        delivered
    }
}

#[async_trait]
impl BackgroundSync for BackgroundWakeRegistry {
    async fn register(&self, tag: &str) -> Result<()> {
        self.pending.insert(tag.to_string());
        debug!("background wake registered: {}", tag);
        Ok(())
    }
}
