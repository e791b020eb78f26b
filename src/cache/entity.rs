//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了离线读取用的领域实体缓存。
//!
//! 实体缓存只是服务端数据的只读镜像，不是数据源；刷新时整体替换，从不局部修改。

use crate::error::Result;
use crate::store::schema::{INVENTORY_COLLECTION, ORDERS_COLLECTION, TASKS_COLLECTION};
use crate::store::{now_millis, DurableStore};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// 可缓存的领域实体
pub trait CachedEntity: Serialize + DeserializeOwned + Send + Sync {
    /// 所属集合
    const COLLECTION: &'static str;
    /// 自然键索引名
    const NATURAL_KEY: &'static str;

    fn id(&self) -> &str;
}

/// 订单快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub status: String,
    #[serde(default)]
    pub cached_at: i64,
    /// 其余字段原样保留
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// 任务快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_code: String,
    pub status: String,
    #[serde(default)]
    pub cached_at: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// 库存条目（桶）快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub barrel_code: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub cached_at: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

macro_rules! impl_cached_entity {
    ($ty:ty, $collection:expr, $natural:expr) => {
        impl CachedEntity for $ty {
            const COLLECTION: &'static str = $collection;
            const NATURAL_KEY: &'static str = $natural;

            fn id(&self) -> &str {
                &self.id
            }
        }
    };
}

impl_cached_entity!(Order, ORDERS_COLLECTION, "order_number");
impl_cached_entity!(Task, TASKS_COLLECTION, "task_code");
impl_cached_entity!(InventoryItem, INVENTORY_COLLECTION, "barrel_code");

/// 单个实体集合的缓存视图
pub struct EntityCache<T: CachedEntity> {
    store: Arc<DurableStore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: CachedEntity> Clone for EntityCache<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: CachedEntity> EntityCache<T> {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    /// 写入实体快照，整体替换同 ID 的旧快照
    #[instrument(skip(self, entity), level = "debug", fields(collection = T::COLLECTION, id = entity.id()))]
    pub async fn put(&self, entity: &T) -> Result<()> {
        let mut value = serde_json::to_value(entity)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("cached_at".to_string(), now_millis().into());
        }
        self.store.put(T::COLLECTION, &value).await
    }

    /// 批量写入
    pub async fn put_many(&self, entities: &[T]) -> Result<usize> {
        for entity in entities {
            self.put(entity).await?;
        }
        debug!("cached {} {}", entities.len(), T::COLLECTION);
        Ok(entities.len())
    }

    pub async fn get(&self, id: &str) -> Result<Option<T>> {
        self.store.get_as(T::COLLECTION, id).await
    }

    /// 按自然键（订单号、任务编码、桶编码）查询
    pub async fn get_by_natural_key(&self, key: &str) -> Result<Option<T>> {
        let mut found = self
            .store
            .get_by_index(T::COLLECTION, T::NATURAL_KEY, key)
            .await?;
        match found.pop() {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    /// 按任意已声明索引查询
    pub async fn find_by(&self, index: &str, value: &str) -> Result<Vec<T>> {
        self.store
            .get_by_index(T::COLLECTION, index, value)
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect()
    }

    pub async fn list(&self) -> Result<Vec<T>> {
        self.store.get_all_as(T::COLLECTION).await
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        self.store.remove(T::COLLECTION, id).await
    }

    pub async fn clear(&self) -> Result<u64> {
        self.store.clear(T::COLLECTION).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count(T::COLLECTION).await
    }

    /// 删除缓存时间早于 `now - max_age` 的快照
    pub async fn evict_older_than(&self, max_age: Duration) -> Result<u64> {
        self.store.delete_older_than(T::COLLECTION, max_age).await
    }
}
