//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了持久化的变更队列，只负责记账，不做任何网络访问。

use crate::error::{Result, SyncError};
use crate::store::schema::QUEUE_COLLECTION;
use crate::store::{now_millis, DurableStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// 待投递的写操作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: String,
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// 入队时间（毫秒）
    pub timestamp: i64,
    pub retries: u32,
    pub max_retries: u32,
}

impl SyncQueueItem {
    /// 是否已用尽重试次数
    pub fn is_exhausted(&self) -> bool {
        self.retries >= self.max_retries
    }
}

/// 变更队列
#[derive(Clone)]
pub struct MutationQueue {
    store: Arc<DurableStore>,
}

impl MutationQueue {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self { store }
    }

    /// 入队，返回新条目的 ID
    #[instrument(skip(self, body, headers), level = "debug")]
    pub async fn enqueue(
        &self,
        url: &str,
        method: &str,
        body: Option<String>,
        headers: BTreeMap<String, String>,
        max_retries: u32,
    ) -> Result<String> {
        if max_retries == 0 {
            return Err(SyncError::InvalidRecord(
                "max_retries must be greater than zero".to_string(),
            ));
        }
        let item = SyncQueueItem {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            method: method.to_ascii_uppercase(),
            body,
            headers,
            timestamp: now_millis(),
            retries: 0,
            max_retries,
        };
        self.store.put_as(QUEUE_COLLECTION, &item).await?;
        debug!("enqueued {} {} as {}", item.method, item.url, item.id);
        Ok(item.id)
    }

    /// 按入队顺序（FIFO）列出全部条目
    pub async fn list(&self) -> Result<Vec<SyncQueueItem>> {
        self.store.get_all_as(QUEUE_COLLECTION).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<SyncQueueItem>> {
        self.store.get_as(QUEUE_COLLECTION, id).await
    }

    /// 删除条目，已删除的 ID 是空操作
    pub async fn remove(&self, id: &str) -> Result<bool> {
        self.store.remove(QUEUE_COLLECTION, id).await
    }

    /// 重试计数加一，返回新的计数
    ///
    /// 条目已被删除（可能是其他上下文投递成功）或计数已达上限时返回 None，
    /// 不会重新写入条目
    #[instrument(skip(self), level = "debug")]
    pub async fn increment_retries(&self, id: &str) -> Result<Option<u32>> {
        let retries = self
            .store
            .increment_bounded(QUEUE_COLLECTION, id, "retries", "max_retries")
            .await?;
        Ok(retries.map(|n| u32::try_from(n).unwrap_or(u32::MAX)))
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count(QUEUE_COLLECTION).await
    }

    pub async fn clear(&self) -> Result<u64> {
        self.store.clear(QUEUE_COLLECTION).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    async fn queue() -> MutationQueue {
        let store = DurableStore::open(&StoreConfig::default()).await.unwrap();
        MutationQueue::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = queue().await;
        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(
                queue
                    .enqueue(&format!("/api/orders/{}", n), "post", None, BTreeMap::new(), 3)
                    .await
                    .unwrap(),
            );
        }
        let listed: Vec<String> = queue.list().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(listed, ids);
        assert_eq!(queue.list().await.unwrap()[0].method, "POST");
        assert_eq!(queue.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_increment_keeps_position() {
        let queue = queue().await;
        let first = queue.enqueue("/a", "PUT", None, BTreeMap::new(), 3).await.unwrap();
        let second = queue.enqueue("/b", "PUT", None, BTreeMap::new(), 3).await.unwrap();

        assert_eq!(queue.increment_retries(&first).await.unwrap(), Some(1));
        assert_eq!(queue.increment_retries(&first).await.unwrap(), Some(2));

        let items = queue.list().await.unwrap();
        assert_eq!(items[0].id, first);
        assert_eq!(items[0].retries, 2);
        assert_eq!(items[1].id, second);
    }

    #[tokio::test]
    async fn test_increment_stops_at_max_retries() {
        let queue = queue().await;
        let id = queue.enqueue("/a", "POST", None, BTreeMap::new(), 2).await.unwrap();

        assert_eq!(queue.increment_retries(&id).await.unwrap(), Some(1));
        assert_eq!(queue.increment_retries(&id).await.unwrap(), Some(2));
        assert_eq!(queue.increment_retries(&id).await.unwrap(), None);

        let item = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(item.retries, 2);
        assert!(item.is_exhausted());
    }

    #[tokio::test]
    async fn test_increment_after_remove_does_not_recreate() {
        let queue = queue().await;
        let id = queue.enqueue("/a", "POST", None, BTreeMap::new(), 3).await.unwrap();
        assert!(queue.remove(&id).await.unwrap());

        assert_eq!(queue.increment_retries(&id).await.unwrap(), None);
        assert!(queue.get(&id).await.unwrap().is_none());
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_ids_are_noops() {
        let queue = queue().await;
        assert_eq!(queue.increment_retries("ghost").await.unwrap(), None);
        assert!(!queue.remove("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_max_retries_rejected() {
        let queue = queue().await;
        assert!(queue
            .enqueue("/a", "POST", None, BTreeMap::new(), 0)
            .await
            .is_err());
    }
}
