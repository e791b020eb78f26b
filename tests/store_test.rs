//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 持久化存储与实体缓存集成测试

mod common;

use common::{cache_config, file_store_config, memory_store, setup_logging, MockNetwork};
use oxsync::cache::{EntityCache, InventoryItem, Order, Task};
use oxsync::config::{Config, EvictionConfig};
use oxsync::context::{ExecutionContext, ForegroundContext};
use oxsync::messaging::{ClientMessage, MessageBus};
use oxsync::store::schema::{
    migrations, ORDERS_COLLECTION, QUEUE_COLLECTION, SCHEMA_VERSION, TASKS_COLLECTION,
};
use oxsync::store::DurableStore;
use oxsync::sync::{Connectivity, MutationQueue};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn order(id: &str, number: &str, status: &str) -> Order {
    serde_json::from_value(json!({
        "id": id,
        "order_number": number,
        "status": status,
        "customer": "ACME",
    }))
    .unwrap()
}

/// 旧版本存储升级：已有数据保留，新集合可用，重复打开幂等
#[tokio::test]
async fn test_schema_upgrade_preserves_data() {
    setup_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = file_store_config(dir.path());

    {
        let v1: Vec<_> = migrations().into_iter().filter(|m| m.version == 1).collect();
        let store = DurableStore::open_with_migrations(&config, v1).await.unwrap();
        assert_eq!(store.schema_version().await.unwrap(), 1);
        assert!(store.count(ORDERS_COLLECTION).await.is_err());

        let queue = MutationQueue::new(Arc::new(store));
        queue
            .enqueue("/api/orders/5/complete", "POST", None, BTreeMap::new(), 3)
            .await
            .unwrap();
    }

    for _ in 0..2 {
        let store = Arc::new(DurableStore::open(&config).await.unwrap());
        assert_eq!(store.schema_version().await.unwrap(), SCHEMA_VERSION);
        assert_eq!(store.count(QUEUE_COLLECTION).await.unwrap(), 1);

        let tasks = EntityCache::<Task>::new(store.clone());
        tasks
            .put(
                &serde_json::from_value(json!({"id": "t1", "task_code": "T-1", "status": "open"}))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(tasks.find_by("status", "open").await.unwrap().len(), 1);
    }
}

/// 升级时为已有记录补齐新增的索引
#[tokio::test]
async fn test_schema_upgrade_backfills_new_index() {
    setup_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = file_store_config(dir.path());

    {
        let before: Vec<_> = migrations()
            .into_iter()
            .filter(|m| m.version < SCHEMA_VERSION)
            .collect();
        let store = DurableStore::open_with_migrations(&config, before).await.unwrap();
        for (id, status) in [("t1", "open"), ("t2", "done"), ("t3", "open")] {
            store
                .put(
                    TASKS_COLLECTION,
                    &json!({"id": id, "task_code": format!("T-{}", id), "status": status}),
                )
                .await
                .unwrap();
        }
        assert!(store.get_by_index(TASKS_COLLECTION, "status", "open").await.is_err());
    }

    let store = Arc::new(DurableStore::open(&config).await.unwrap());
    assert_eq!(store.schema_version().await.unwrap(), SCHEMA_VERSION);
    let tasks = EntityCache::<Task>::new(store);
    let mut open: Vec<String> = tasks
        .find_by("status", "open")
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    open.sort();
    assert_eq!(open, vec!["t1".to_string(), "t3".to_string()]);
    assert_eq!(tasks.find_by("status", "done").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_queue_survives_reopen() {
    setup_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = file_store_config(dir.path());

    let ids = {
        let queue = MutationQueue::new(Arc::new(DurableStore::open(&config).await.unwrap()));
        let mut ids = Vec::new();
        for n in 1..=3 {
            ids.push(
                queue
                    .enqueue(&format!("/api/orders/{}", n), "POST", None, BTreeMap::new(), 3)
                    .await
                    .unwrap(),
            );
        }
        ids
    };

    let queue = MutationQueue::new(Arc::new(DurableStore::open(&config).await.unwrap()));
    let listed: Vec<String> = queue.list().await.unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(listed, ids);
}

/// 时效清理：超过 maxAge 的实体被删除，未超过的保留
#[tokio::test]
async fn test_entity_eviction_threshold() {
    let orders = EntityCache::<Order>::new(memory_store().await);
    orders.put(&order("o1", "SO-1001", "open")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(orders.evict_older_than(Duration::from_secs(3600)).await.unwrap(), 0);
    assert!(orders.get("o1").await.unwrap().is_some());

    assert_eq!(orders.evict_older_than(Duration::from_millis(5)).await.unwrap(), 1);
    assert!(orders.get("o1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_entity_lookup_by_natural_key() {
    let store = memory_store().await;
    let orders = EntityCache::<Order>::new(store.clone());
    let inventory = EntityCache::<InventoryItem>::new(store);

    orders
        .put_many(&[order("o1", "SO-1001", "open"), order("o2", "SO-1002", "shipped")])
        .await
        .unwrap();
    let found = orders.get_by_natural_key("SO-1002").await.unwrap().unwrap();
    assert_eq!(found.id, "o2");
    assert_eq!(found.extra.get("customer"), Some(&json!("ACME")));
    assert!(found.cached_at > 0);

    let barrel: InventoryItem =
        serde_json::from_value(json!({"id": "b7", "barrel_code": "BRL-0007", "location": "A3"}))
            .unwrap();
    inventory.put(&barrel).await.unwrap();
    assert_eq!(
        inventory
            .get_by_natural_key("BRL-0007")
            .await
            .unwrap()
            .unwrap()
            .location
            .as_deref(),
        Some("A3")
    );
    assert!(inventory.get_by_natural_key("BRL-9999").await.unwrap().is_none());
}

/// 前台上下文：按配置清理、清空实体、向后台发送消息
#[tokio::test]
async fn test_foreground_context_housekeeping() {
    setup_logging();
    let config = Config {
        cache: cache_config(),
        eviction: EvictionConfig {
            entity_max_age_secs: 3600,
            response_max_age_secs: 3600,
        },
        ..Default::default()
    };
    let ctx = ExecutionContext::with_store(config, memory_store().await);
    let bus = MessageBus::new();
    let mut background_rx = bus.subscribe_background();
    let foreground = ForegroundContext::new(
        &ctx,
        MockNetwork::with_status(200),
        Connectivity::new(true),
        bus,
        None,
    )
    .await
    .unwrap();

    foreground.orders().put(&order("o1", "SO-1", "open")).await.unwrap();
    let report = foreground.evict_stale().await.unwrap();
    assert_eq!(report.entities(), 0);
    assert_eq!(foreground.orders().count().await.unwrap(), 1);

    assert_eq!(foreground.clear_all_entities().await.unwrap(), 1);

    assert_eq!(foreground.clear_caches(), 1);
    assert_eq!(foreground.skip_waiting(), 1);
    assert_eq!(background_rx.recv().await.unwrap(), ClientMessage::ClearCache);
    assert_eq!(background_rx.recv().await.unwrap(), ClientMessage::SkipWaiting);
}

/// 同一执行上下文只打开一次存储
#[tokio::test]
async fn test_context_opens_store_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        store: file_store_config(dir.path()),
        ..Default::default()
    };
    let ctx = ExecutionContext::new(config);
    let a = ctx.store().await.unwrap();
    let b = ctx.store().await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}
