//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了版本化的本地持久化存储。
//!
//! 每个集合映射为一张 SQLite 表：`key` 主键列、`recency` 时效列、`data` JSON 列，
//! 以及每个二级索引对应的 `idx_<name>` 列。所有读取都返回反序列化后的副本。

pub mod connection_string;
pub mod schema;

use crate::config::StoreConfig;
use crate::error::{Result, SyncError};
use connection_string::{ensure_database_directory, normalize_connection_string};
use schema::{resolve_collections, CollectionSchema, IndexSchema, Migration, MigrationStep};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, QueryResult,
    Statement, Value,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

const META_TABLE: &str = "store_meta";
const VERSION_KEY: &str = "schema_version";

/// 当前时间（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn storage_err(e: sea_orm::DbErr) -> SyncError {
    SyncError::Storage(e.to_string())
}

/// 验证SQL标识符是否安全
///
/// 只能包含字母、数字、下划线，且不能以数字开头
fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() || identifier.len() > 64 {
        return Err(SyncError::Storage(format!(
            "Invalid identifier '{}': length must be 1..=64",
            identifier
        )));
    }
    let mut chars = identifier.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SyncError::Storage(format!(
            "Invalid identifier '{}': only alphanumeric characters and underscores are allowed",
            identifier
        )));
    }
    Ok(())
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

fn index_column(index: &str) -> String {
    format!("idx_{}", index)
}

/// 把记录字段转成可索引的字符串
fn field_as_string(record: &serde_json::Value, field: &str) -> Option<String> {
    match record.get(field)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// 持久化存储
///
/// 每个执行上下文只打开一次，之后所有组件共享同一个句柄
pub struct DurableStore {
    db: DatabaseConnection,
    collections: BTreeMap<String, CollectionSchema>,
    latest_version: u32,
}

impl DurableStore {
    /// 使用内置迁移打开存储
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        Self::open_with_migrations(config, schema::migrations()).await
    }

    /// 使用指定迁移打开存储
    ///
    /// 迁移只允许新增集合或索引，对已有数据的旧版本存储重复执行是安全的
    #[instrument(skip(config, migrations), level = "info", fields(conn = %config.connection_string))]
    pub async fn open_with_migrations(
        config: &StoreConfig,
        migrations: Vec<Migration>,
    ) -> Result<Self> {
        ensure_database_directory(&config.connection_string)?;
        let normalized = normalize_connection_string(&config.connection_string)?;

        let is_memory = normalized.starts_with("sqlite::memory:");
        let mut opt = ConnectOptions::new(normalized);
        opt.max_connections(1)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .sqlx_logging(false);
        if is_memory {
            // 内存库随唯一连接释放，连接不能被回收
            opt.map_sqlx_sqlite_pool_opts(|pool| pool.max_lifetime(None).idle_timeout(None));
        }

        let db = Database::connect(opt)
            .await
            .map_err(|e| SyncError::Storage(format!("Failed to open store: {}", e)))?;

        let collections = resolve_collections(&migrations);
        for schema in collections.values() {
            validate_identifier(&schema.name)?;
            for index in &schema.indexes {
                validate_identifier(&index.name)?;
            }
        }
        let latest_version = migrations.iter().map(|m| m.version).max().unwrap_or(0);

        let store = Self {
            db,
            collections,
            latest_version,
        };
        store.migrate(migrations).await?;
        Ok(store)
    }

    /// 已持久化的 Schema 版本
    pub async fn schema_version(&self) -> Result<u32> {
        let row = self
            .query_one(
                &format!("SELECT value FROM {} WHERE key = ?", META_TABLE),
                vec![Value::String(Some(VERSION_KEY.to_string()))],
            )
            .await?;
        match row {
            Some(row) => {
                let value: String = row.try_get("", "value").map_err(storage_err)?;
                value
                    .parse::<u32>()
                    .map_err(|e| SyncError::Storage(format!("Corrupted schema version: {}", e)))
            }
            None => Ok(0),
        }
    }

    /// 已声明的集合
    pub fn collections(&self) -> impl Iterator<Item = &CollectionSchema> {
        self.collections.values()
    }

    async fn migrate(&self, mut migrations: Vec<Migration>) -> Result<()> {
        self.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
                META_TABLE
            ),
            vec![],
        )
        .await?;

        let current = self.schema_version().await?;
        if current > self.latest_version {
            return Err(SyncError::Storage(format!(
                "Store schema version {} is newer than supported version {}",
                current, self.latest_version
            )));
        }

        migrations.sort_by_key(|m| m.version);
        for migration in migrations.iter().filter(|m| m.version > current) {
            info!("Applying store migration v{}", migration.version);
            for step in &migration.steps {
                match step {
                    MigrationStep::CreateCollection(schema) => {
                        self.ensure_collection(schema).await?;
                    }
                    MigrationStep::AddIndex { collection, index } => {
                        let schema = self.schema(collection)?;
                        self.ensure_index(schema, index).await?;
                    }
                }
            }
            self.write_meta(VERSION_KEY, &migration.version.to_string())
                .await?;
            self.write_meta(
                &format!("migration:{}", migration.version),
                &chrono::Utc::now().to_rfc3339(),
            )
            .await?;
        }

        debug!("Store schema at v{}", self.latest_version.max(current));
        Ok(())
    }

    async fn write_meta(&self, key: &str, value: &str) -> Result<()> {
        self.execute(
            &format!(
                "INSERT INTO {} (key, value) VALUES (?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                META_TABLE
            ),
            vec![
                Value::String(Some(key.to_string())),
                Value::String(Some(value.to_string())),
            ],
        )
        .await?;
        Ok(())
    }

    async fn ensure_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let table = quote(&schema.name);
        self.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, recency INTEGER NOT NULL, data TEXT NOT NULL)",
                table
            ),
            vec![],
        )
        .await?;
        self.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} (recency)",
                quote(&format!("{}_recency", schema.name)),
                table
            ),
            vec![],
        )
        .await?;

        // 索引列可能来自更高版本的声明，这里只补齐本集合创建时已知的索引
        let resolved = self.schema(&schema.name)?;
        for index in &schema.indexes {
            self.ensure_index(resolved, index).await?;
        }
        Ok(())
    }

    async fn ensure_index(&self, schema: &CollectionSchema, index: &IndexSchema) -> Result<()> {
        let table = quote(&schema.name);
        let column = index_column(&index.name);

        let existing = self
            .query_all(
                &format!("SELECT name FROM pragma_table_info('{}')", schema.name),
                vec![],
            )
            .await?;
        let mut has_column = false;
        for row in existing {
            let name: String = row.try_get("", "name").map_err(storage_err)?;
            if name == column {
                has_column = true;
                break;
            }
        }

        if !has_column {
            self.execute(
                &format!("ALTER TABLE {} ADD COLUMN {} TEXT", table, quote(&column)),
                vec![],
            )
            .await?;
            // 回填已有记录
            let backfilled = self
                .execute(
                    &format!(
                        "UPDATE {} SET {} = json_extract(data, ?)",
                        table,
                        quote(&column)
                    ),
                    vec![Value::String(Some(format!("$.{}", index.field)))],
                )
                .await?;
            debug!(
                "Added index column {}.{} ({} rows backfilled)",
                schema.name, column, backfilled
            );
        }

        self.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote(&format!("{}_{}", schema.name, index.name)),
                table,
                quote(&column)
            ),
            vec![],
        )
        .await?;
        Ok(())
    }

    fn schema(&self, collection: &str) -> Result<&CollectionSchema> {
        self.collections
            .get(collection)
            .ok_or_else(|| SyncError::Storage(format!("Unknown collection '{}'", collection)))
    }

    fn index_of<'a>(&self, schema: &'a CollectionSchema, index: &str) -> Result<&'a IndexSchema> {
        schema.index(index).ok_or_else(|| {
            SyncError::Storage(format!(
                "Collection '{}' has no index '{}'",
                schema.name, index
            ))
        })
    }

    async fn execute(&self, sql: &str, values: Vec<Value>) -> Result<u64> {
        let result = self
            .db
            .execute_raw(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                sql,
                values,
            ))
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected())
    }

    async fn query_one(&self, sql: &str, values: Vec<Value>) -> Result<Option<QueryResult>> {
        self.db
            .query_one_raw(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                sql,
                values,
            ))
            .await
            .map_err(storage_err)
    }

    async fn query_all(&self, sql: &str, values: Vec<Value>) -> Result<Vec<QueryResult>> {
        self.db
            .query_all_raw(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                sql,
                values,
            ))
            .await
            .map_err(storage_err)
    }

    fn decode_rows(rows: Vec<QueryResult>) -> Result<Vec<serde_json::Value>> {
        rows.into_iter()
            .map(|row| {
                let data: String = row.try_get("", "data").map_err(storage_err)?;
                Ok(serde_json::from_str(&data)?)
            })
            .collect()
    }

    /// 读取单条记录
    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>> {
        let schema = self.schema(collection)?;
        let row = self
            .query_one(
                &format!("SELECT data FROM {} WHERE key = ?", quote(&schema.name)),
                vec![Value::String(Some(key.to_string()))],
            )
            .await?;
        match row {
            Some(row) => {
                let data: String = row.try_get("", "data").map_err(storage_err)?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    /// 写入记录，主键相同则整体覆盖
    #[instrument(skip(self, record), level = "debug")]
    pub async fn put(&self, collection: &str, record: &serde_json::Value) -> Result<()> {
        let schema = self.schema(collection)?;
        if !record.is_object() {
            return Err(SyncError::InvalidRecord(format!(
                "Record for '{}' must be an object",
                collection
            )));
        }
        let key = field_as_string(record, &schema.key_path).ok_or_else(|| {
            SyncError::InvalidRecord(format!(
                "Record for '{}' is missing key '{}'",
                collection, schema.key_path
            ))
        })?;
        let recency = schema
            .recency_field
            .as_deref()
            .and_then(|f| record.get(f))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_else(now_millis);

        let mut columns = vec!["key".to_string(), "recency".to_string(), "data".to_string()];
        let mut values = vec![
            Value::String(Some(key)),
            Value::BigInt(Some(recency)),
            Value::String(Some(serde_json::to_string(record)?)),
        ];
        for index in &schema.indexes {
            columns.push(quote(&index_column(&index.name)));
            values.push(Value::String(
                field_as_string(record, &index.field),
            ));
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let updates: Vec<String> = columns
            .iter()
            .skip(1)
            .map(|c| format!("{} = excluded.{}", c, c))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(key) DO UPDATE SET {}",
            quote(&schema.name),
            columns.join(", "),
            placeholders,
            updates.join(", ")
        );
        self.execute(&sql, values).await?;
        Ok(())
    }

    /// 删除记录，返回是否真的删除了
    ///
    /// 删除不存在的主键不是错误
    #[instrument(skip(self), level = "debug")]
    pub async fn remove(&self, collection: &str, key: &str) -> Result<bool> {
        let schema = self.schema(collection)?;
        let affected = self
            .execute(
                &format!("DELETE FROM {} WHERE key = ?", quote(&schema.name)),
                vec![Value::String(Some(key.to_string()))],
            )
            .await?;
        Ok(affected > 0)
    }

    /// 原地把记录中的整数字段加一，不超过 `limit_field` 的值
    ///
    /// 单条 UPDATE 完成，记录不存在或已到上限时返回 None，从不插入
    #[instrument(skip(self), level = "debug")]
    pub async fn increment_bounded(
        &self,
        collection: &str,
        key: &str,
        field: &str,
        limit_field: &str,
    ) -> Result<Option<i64>> {
        let schema = self.schema(collection)?;
        validate_identifier(field)?;
        validate_identifier(limit_field)?;
        let path = format!("$.{}", field);
        let limit = format!("$.{}", limit_field);

        let row = self
            .query_one(
                &format!(
                    "UPDATE {} SET data = json_set(data, ?, json_extract(data, ?) + 1) \
                     WHERE key = ? AND json_extract(data, ?) < json_extract(data, ?) \
                     RETURNING json_extract(data, ?) AS value",
                    quote(&schema.name)
                ),
                vec![
                    Value::String(Some(path.clone())),
                    Value::String(Some(path.clone())),
                    Value::String(Some(key.to_string())),
                    Value::String(Some(path.clone())),
                    Value::String(Some(limit)),
                    Value::String(Some(path)),
                ],
            )
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("", "value").map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    /// 按插入顺序读取全部记录
    #[instrument(skip(self), level = "debug")]
    pub async fn get_all(&self, collection: &str) -> Result<Vec<serde_json::Value>> {
        let schema = self.schema(collection)?;
        let rows = self
            .query_all(
                &format!("SELECT data FROM {} ORDER BY rowid ASC", quote(&schema.name)),
                vec![],
            )
            .await?;
        Self::decode_rows(rows)
    }

    /// 按二级索引查询
    #[instrument(skip(self), level = "debug")]
    pub async fn get_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &str,
    ) -> Result<Vec<serde_json::Value>> {
        let schema = self.schema(collection)?;
        let index = self.index_of(schema, index)?;
        let rows = self
            .query_all(
                &format!(
                    "SELECT data FROM {} WHERE {} = ? ORDER BY rowid ASC",
                    quote(&schema.name),
                    quote(&index_column(&index.name))
                ),
                vec![Value::String(Some(value.to_string()))],
            )
            .await?;
        Self::decode_rows(rows)
    }

    /// 二级索引上的去重取值
    pub async fn index_values(&self, collection: &str, index: &str) -> Result<Vec<String>> {
        let schema = self.schema(collection)?;
        let index = self.index_of(schema, index)?;
        let column = quote(&index_column(&index.name));
        let rows = self
            .query_all(
                &format!(
                    "SELECT DISTINCT {} AS v FROM {} WHERE {} IS NOT NULL ORDER BY v",
                    column,
                    quote(&schema.name),
                    column
                ),
                vec![],
            )
            .await?;
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let v: Option<String> = row.try_get("", "v").map_err(storage_err)?;
            values.extend(v);
        }
        Ok(values)
    }

    /// 按二级索引删除，返回删除条数
    pub async fn delete_by_index(&self, collection: &str, index: &str, value: &str) -> Result<u64> {
        let schema = self.schema(collection)?;
        let index = self.index_of(schema, index)?;
        self.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?",
                quote(&schema.name),
                quote(&index_column(&index.name))
            ),
            vec![Value::String(Some(value.to_string()))],
        )
        .await
    }

    /// 清空集合
    #[instrument(skip(self), level = "debug")]
    pub async fn clear(&self, collection: &str) -> Result<u64> {
        let schema = self.schema(collection)?;
        self.execute(&format!("DELETE FROM {}", quote(&schema.name)), vec![])
            .await
    }

    /// 记录条数
    pub async fn count(&self, collection: &str) -> Result<usize> {
        let schema = self.schema(collection)?;
        let row = self
            .query_one(
                &format!("SELECT COUNT(*) AS n FROM {}", quote(&schema.name)),
                vec![],
            )
            .await?;
        let n: i64 = match row {
            Some(row) => row.try_get("", "n").map_err(storage_err)?,
            None => 0,
        };
        Ok(n.max(0) as usize)
    }

    /// 删除时效早于 `now - max_age` 的全部记录，返回删除条数
    #[instrument(skip(self), level = "debug")]
    pub async fn delete_older_than(&self, collection: &str, max_age: Duration) -> Result<u64> {
        let schema = self.schema(collection)?;
        if schema.recency_field.is_none() {
            return Err(SyncError::NotSupported(format!(
                "Collection '{}' has no recency index",
                collection
            )));
        }
        let cutoff = now_millis() - max_age.as_millis().min(i64::MAX as u128) as i64;
        let removed = self
            .execute(
                &format!("DELETE FROM {} WHERE recency < ?", quote(&schema.name)),
                vec![Value::BigInt(Some(cutoff))],
            )
            .await?;
        debug!("Evicted {} records from {}", removed, collection);
        Ok(removed)
    }

    /// 读取并反序列化为指定类型
    pub async fn get_as<T: DeserializeOwned>(&self, collection: &str, key: &str) -> Result<Option<T>> {
        match self.get(collection, key).await? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    /// 序列化后写入
    pub async fn put_as<T: Serialize>(&self, collection: &str, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.put(collection, &value).await
    }

    /// 读取全部并反序列化
    pub async fn get_all_as<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        self.get_all(collection)
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(SyncError::from))
            .collect()
    }
}
