//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了同步状态及其订阅机制。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// 同步状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_processing: bool,
    pub pending_count: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

type Callback = Arc<dyn Fn(&SyncStatus) + Send + Sync>;
type Subscribers = DashMap<u64, Callback>;

/// 状态广播器
///
/// 每个订阅者独立持有一个 [`Subscription`]，互不干扰
#[derive(Default)]
pub struct StatusBroadcaster {
    subscribers: Arc<Subscribers>,
    next_id: AtomicU64,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, Arc::new(callback));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// 通知所有订阅者
    pub fn publish(&self, status: &SyncStatus) {
        // 先复制回调再调用，回调里取消订阅不会死锁
        let callbacks: Vec<Callback> = self
            .subscribers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for callback in callbacks {
            callback(status);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// 订阅句柄，drop 或调用 [`Subscription::unsubscribe`] 即取消订阅
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.remove(&self.id);
        }
    }
}
