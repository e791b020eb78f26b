//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了按分区组织的网络响应缓存。

use crate::error::Result;
use crate::http::Response;
use crate::store::schema::RESPONSE_COLLECTION;
use crate::store::{now_millis, DurableStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// 缓存的网络响应
///
/// 每个分区内每个 URL 至多一条，每次成功刷新都会整体覆盖
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// 复合主键: `<partition>|<url>`
    pub id: String,
    pub partition: String,
    pub url: String,
    pub data: Response,
    /// 写入时间（毫秒）
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

fn entry_id(partition: &str, url: &str) -> String {
    format!("{}|{}", partition, url)
}

/// 响应缓存
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<DurableStore>,
}

impl ResponseCache {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self { store }
    }

    /// 写入响应，覆盖同分区同 URL 的旧条目
    #[instrument(skip(self, data), level = "debug")]
    pub async fn put(
        &self,
        partition: &str,
        url: &str,
        data: &Response,
        etag: Option<&str>,
    ) -> Result<()> {
        let entry = CachedResponse {
            id: entry_id(partition, url),
            partition: partition.to_string(),
            url: url.to_string(),
            data: data.clone(),
            timestamp: now_millis(),
            etag: etag.map(str::to_string),
        };
        self.store.put_as(RESPONSE_COLLECTION, &entry).await?;
        debug!("response cached: partition={}, url={}", partition, url);
        Ok(())
    }

    /// 读取响应数据
    pub async fn get(&self, partition: &str, url: &str) -> Result<Option<Response>> {
        Ok(self.get_entry(partition, url).await?.map(|e| e.data))
    }

    /// 读取完整条目（含时间戳与 ETag）
    pub async fn get_entry(&self, partition: &str, url: &str) -> Result<Option<CachedResponse>> {
        self.store
            .get_as(RESPONSE_COLLECTION, &entry_id(partition, url))
            .await
    }

    /// 使单个条目失效
    pub async fn invalidate(&self, partition: &str, url: &str) -> Result<bool> {
        self.store
            .remove(RESPONSE_COLLECTION, &entry_id(partition, url))
            .await
    }

    /// 清空分区
    #[instrument(skip(self), level = "debug")]
    pub async fn clear(&self, partition: &str) -> Result<u64> {
        self.store
            .delete_by_index(RESPONSE_COLLECTION, "partition", partition)
            .await
    }

    /// 所有存在条目的分区名
    pub async fn partitions(&self) -> Result<Vec<String>> {
        self.store
            .index_values(RESPONSE_COLLECTION, "partition")
            .await
    }

    /// 分区内的全部条目
    pub async fn entries(&self, partition: &str) -> Result<Vec<CachedResponse>> {
        self.store
            .get_by_index(RESPONSE_COLLECTION, "partition", partition)
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect()
    }

    /// 按时效清理所有分区
    pub async fn evict_all_older_than(&self, max_age: Duration) -> Result<u64> {
        self.store
            .delete_older_than(RESPONSE_COLLECTION, max_age)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    async fn cache() -> ResponseCache {
        let store = DurableStore::open(&StoreConfig::default()).await.unwrap();
        ResponseCache::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let cache = cache().await;
        cache
            .put("app-v1", "/a", &Response::new(200, "general"), None)
            .await
            .unwrap();
        cache
            .put("app-api-v1", "/a", &Response::new(200, "api"), Some("\"e1\""))
            .await
            .unwrap();

        assert_eq!(cache.get("app-v1", "/a").await.unwrap().unwrap().text(), "general");
        let entry = cache.get_entry("app-api-v1", "/a").await.unwrap().unwrap();
        assert_eq!(entry.data.text(), "api");
        assert_eq!(entry.etag.as_deref(), Some("\"e1\""));

        assert_eq!(cache.clear("app-v1").await.unwrap(), 1);
        assert!(cache.get("app-v1", "/a").await.unwrap().is_none());
        assert!(cache.get("app-api-v1", "/a").await.unwrap().is_some());
        assert_eq!(cache.partitions().await.unwrap(), vec!["app-api-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_put_overwrites_and_invalidate() {
        let cache = cache().await;
        cache.put("p", "/x", &Response::new(200, "one"), None).await.unwrap();
        cache.put("p", "/x", &Response::new(200, "two"), None).await.unwrap();
        assert_eq!(cache.entries("p").await.unwrap().len(), 1);
        assert_eq!(cache.get("p", "/x").await.unwrap().unwrap().text(), "two");

        assert!(cache.invalidate("p", "/x").await.unwrap());
        assert!(!cache.invalidate("p", "/x").await.unwrap());
    }
}
