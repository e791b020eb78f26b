//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了持久化存储的集合声明和版本化迁移。

use std::collections::BTreeMap;

/// 响应缓存集合
pub const RESPONSE_COLLECTION: &str = "api_cache";
/// 变更队列集合
pub const QUEUE_COLLECTION: &str = "sync_queue";
/// 订单实体集合
pub const ORDERS_COLLECTION: &str = "orders";
/// 任务实体集合
pub const TASKS_COLLECTION: &str = "tasks";
/// 库存实体集合
pub const INVENTORY_COLLECTION: &str = "inventory";

/// 当前 Schema 版本，单调递增
pub const SCHEMA_VERSION: u32 = 3;

/// 二级索引声明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    /// 索引名
    pub name: String,
    /// 被索引的记录字段
    pub field: String,
}

impl IndexSchema {
    pub fn new(name: &str, field: &str) -> Self {
        Self {
            name: name.to_string(),
            field: field.to_string(),
        }
    }
}

/// 集合声明
///
/// 每个集合有一个主键字段、一个可选的时效字段（毫秒时间戳）以及零个或多个二级索引
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: String,
    pub key_path: String,
    pub recency_field: Option<String>,
    pub indexes: Vec<IndexSchema>,
}

impl CollectionSchema {
    pub fn new(name: &str, key_path: &str) -> Self {
        Self {
            name: name.to_string(),
            key_path: key_path.to_string(),
            recency_field: None,
            indexes: Vec::new(),
        }
    }

    pub fn with_recency(mut self, field: &str) -> Self {
        self.recency_field = Some(field.to_string());
        self
    }

    pub fn with_index(mut self, name: &str, field: &str) -> Self {
        self.indexes.push(IndexSchema::new(name, field));
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// 迁移步骤，只允许新增
#[derive(Debug, Clone)]
pub enum MigrationStep {
    CreateCollection(CollectionSchema),
    AddIndex {
        collection: String,
        index: IndexSchema,
    },
}

/// 单个版本的迁移
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub steps: Vec<MigrationStep>,
}

/// 内置迁移历史
pub fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            steps: vec![
                MigrationStep::CreateCollection(
                    CollectionSchema::new(RESPONSE_COLLECTION, "id")
                        .with_recency("timestamp")
                        .with_index("partition", "partition")
                        .with_index("url", "url"),
                ),
                MigrationStep::CreateCollection(
                    CollectionSchema::new(QUEUE_COLLECTION, "id").with_recency("timestamp"),
                ),
            ],
        },
        Migration {
            version: 2,
            steps: vec![
                MigrationStep::CreateCollection(
                    CollectionSchema::new(ORDERS_COLLECTION, "id")
                        .with_recency("cached_at")
                        .with_index("order_number", "order_number"),
                ),
                MigrationStep::CreateCollection(
                    CollectionSchema::new(TASKS_COLLECTION, "id")
                        .with_recency("cached_at")
                        .with_index("task_code", "task_code"),
                ),
                MigrationStep::CreateCollection(
                    CollectionSchema::new(INVENTORY_COLLECTION, "id")
                        .with_recency("cached_at")
                        .with_index("barrel_code", "barrel_code"),
                ),
            ],
        },
        Migration {
            version: 3,
            steps: vec![MigrationStep::AddIndex {
                collection: TASKS_COLLECTION.to_string(),
                index: IndexSchema::new("status", "status"),
            }],
        },
    ]
}

/// 按顺序重放迁移，得到最终的集合声明
pub fn resolve_collections(migrations: &[Migration]) -> BTreeMap<String, CollectionSchema> {
    let mut collections = BTreeMap::new();
    let mut ordered: Vec<&Migration> = migrations.iter().collect();
    ordered.sort_by_key(|m| m.version);

    for migration in ordered {
        for step in &migration.steps {
            match step {
                MigrationStep::CreateCollection(schema) => {
                    collections
                        .entry(schema.name.clone())
                        .or_insert_with(|| schema.clone());
                }
                MigrationStep::AddIndex { collection, index } => {
                    if let Some(schema) = collections.get_mut(collection) {
                        if schema.index(&index.name).is_none() {
                            schema.indexes.push(index.clone());
                        }
                    }
                }
            }
        }
    }
    collections
}
