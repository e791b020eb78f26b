//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了执行上下文：每个上下文只打开一次持久化存储，并显式注入到所有组件。
//!
//! 后台上下文运行缓存路由器，前台上下文（每个页面一个）运行同步协调器和实体缓存。
//! 两者不共享内存，只通过持久化存储和 [`MessageBus`] 协作。

use crate::cache::{EntityCache, InventoryItem, Order, ResponseCache, Task};
use crate::config::{Config, EvictionConfig};
use crate::error::{Result, SyncError};
use crate::http::{Fetcher, Request, Response};
use crate::messaging::{ClientMessage, MessageBus};
use crate::router::CacheRouter;
use crate::store::DurableStore;
use crate::sync::{
    BackgroundSync, BackgroundWakeRegistry, Connectivity, MutationQueue, SyncCoordinator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// 执行上下文
///
/// 持有配置和懒加载的存储句柄，存储在首次使用时打开，随上下文一起销毁
pub struct ExecutionContext {
    config: Config,
    store: OnceCell<Arc<DurableStore>>,
}

impl ExecutionContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: OnceCell::new(),
        }
    }

    /// 使用已打开的存储，测试中可借此注入隔离的存储
    pub fn with_store(config: Config, store: Arc<DurableStore>) -> Self {
        Self {
            config,
            store: OnceCell::new_with(Some(store)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 获取存储句柄，首次调用时打开并执行迁移
    pub async fn store(&self) -> Result<Arc<DurableStore>> {
        self.store
            .get_or_try_init(|| async {
                info!("opening durable store");
                DurableStore::open(&self.config.store).await.map(Arc::new)
            })
            .await
            .map(Arc::clone)
    }
}

/// 后台上下文
pub struct BackgroundContext {
    router: Arc<CacheRouter>,
    wake: Arc<BackgroundWakeRegistry>,
    bus: MessageBus,
}

impl BackgroundContext {
    pub async fn new(
        ctx: &ExecutionContext,
        fetcher: Arc<dyn Fetcher>,
        bus: MessageBus,
    ) -> Result<Self> {
        let cache = ResponseCache::new(ctx.store().await?);
        let router = CacheRouter::new(ctx.config().cache.clone(), cache, fetcher, bus.clone())?;
        Ok(Self {
            router: Arc::new(router),
            wake: Arc::new(BackgroundWakeRegistry::new(bus.clone())),
            bus,
        })
    }

    pub fn router(&self) -> &Arc<CacheRouter> {
        &self.router
    }

    /// 供前台协调器使用的唤醒能力
    pub fn background_sync(&self) -> Arc<dyn BackgroundSync> {
        self.wake.clone()
    }

    /// 拦截一个出站请求
    pub async fn handle(&self, request: &Request) -> Result<Response> {
        self.router.handle(request).await
    }

    /// 平台的后台同步事件
    pub fn on_sync_event(&self, tag: &str) -> usize {
        self.wake.fire(tag)
    }

    /// 处理页面发来的消息直到 `shutdown` 被取消
    pub fn run(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let router = Arc::clone(&self.router);
        let mut messages = self.bus.subscribe_background();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("background message loop stopped");
                        break;
                    }
                    msg = messages.recv() => match msg {
                        Ok(msg) => {
                            if let Err(e) = router.handle_message(&msg).await {
                                warn!("failed to handle {:?}: {}", msg, e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("background context missed {} messages", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}

/// 过期清理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub orders: u64,
    pub tasks: u64,
    pub inventory: u64,
    pub responses: u64,
}

impl EvictionReport {
    pub fn entities(&self) -> u64 {
        self.orders + self.tasks + self.inventory
    }
}

/// 前台上下文
pub struct ForegroundContext {
    coordinator: Arc<SyncCoordinator>,
    orders: EntityCache<Order>,
    tasks: EntityCache<Task>,
    inventory: EntityCache<InventoryItem>,
    responses: ResponseCache,
    eviction: EvictionConfig,
    bus: MessageBus,
}

impl ForegroundContext {
    /// `background` 为 None 时协调器只依赖定时器
    pub async fn new(
        ctx: &ExecutionContext,
        fetcher: Arc<dyn Fetcher>,
        connectivity: Connectivity,
        bus: MessageBus,
        background: Option<Arc<dyn BackgroundSync>>,
    ) -> Result<Self> {
        let store = ctx.store().await?;
        let config = ctx.config();
        let base_url = Url::parse(&config.cache.origin).map_err(|e| {
            SyncError::ConfigError(format!("invalid origin '{}': {}", config.cache.origin, e))
        })?;

        let mut coordinator = SyncCoordinator::new(
            MutationQueue::new(store.clone()),
            fetcher,
            connectivity,
            config.sync.clone(),
            base_url,
        );
        if let Some(background) = background {
            coordinator = coordinator.with_background_sync(background);
        }

        Ok(Self {
            coordinator: Arc::new(coordinator),
            orders: EntityCache::new(store.clone()),
            tasks: EntityCache::new(store.clone()),
            inventory: EntityCache::new(store.clone()),
            responses: ResponseCache::new(store),
            eviction: config.eviction.clone(),
            bus,
        })
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn orders(&self) -> &EntityCache<Order> {
        &self.orders
    }

    pub fn tasks(&self) -> &EntityCache<Task> {
        &self.tasks
    }

    pub fn inventory(&self) -> &EntityCache<InventoryItem> {
        &self.inventory
    }

    /// 启动同步协调器的所有触发源
    pub fn start(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.coordinator.start(self.bus.clone(), shutdown)
    }

    /// 请后台上下文删除全部缓存分区
    pub fn clear_caches(&self) -> usize {
        self.bus.post_to_background(ClientMessage::ClearCache)
    }

    /// 请后台上下文立即启用等待中的新版本
    pub fn skip_waiting(&self) -> usize {
        self.bus.post_to_background(ClientMessage::SkipWaiting)
    }

    /// 清空所有实体缓存
    pub async fn clear_all_entities(&self) -> Result<u64> {
        let total = self.orders.clear().await? + self.tasks.clear().await? + self.inventory.clear().await?;
        info!("cleared {} cached entities", total);
        Ok(total)
    }

    /// 按配置的时效清理实体缓存和响应缓存
    pub async fn evict_stale(&self) -> Result<EvictionReport> {
        let entity_age = Duration::from_secs(self.eviction.entity_max_age_secs);
        let report = EvictionReport {
            orders: self.orders.evict_older_than(entity_age).await?,
            tasks: self.tasks.evict_older_than(entity_age).await?,
            inventory: self.inventory.evict_older_than(entity_age).await?,
            responses: self
                .responses
                .evict_all_older_than(Duration::from_secs(self.eviction.response_max_age_secs))
                .await?,
        };
        info!(
            "evicted {} entities and {} responses",
            report.entities(),
            report.responses
        );
        Ok(report)
    }
}
