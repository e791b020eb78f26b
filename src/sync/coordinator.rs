//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了同步协调器：决定何时清空变更队列，按条目结果执行删除或重试，并发布状态。

use super::background::BackgroundSync;
use super::connectivity::Connectivity;
use super::queue::{MutationQueue, SyncQueueItem};
use super::status::{StatusBroadcaster, Subscription, SyncStatus};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::http::{Fetcher, Request};
use crate::messaging::{ClientMessage, MessageBus};
use crate::metrics::GLOBAL_METRICS;
use bytes::Bytes;
use chrono::Utc;
use reqwest::Method;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// 跳过同步的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 当前离线
    Offline,
    /// 已有一轮同步在进行
    InProgress,
}

/// 一轮同步的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub skipped: Option<SkipReason>,
    pub attempted: usize,
    /// 2xx，已删除
    pub delivered: usize,
    /// 4xx 或请求本身无效，直接删除
    pub rejected: usize,
    /// 可恢复失败，重试计数加一后保留
    pub retried: usize,
    /// 重试用尽后删除
    pub dropped: usize,
    pub last_error: Option<String>,
}

impl DrainReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    pub fn ran(&self) -> bool {
        self.skipped.is_none()
    }
}

struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 同步协调器
///
/// 每个前台上下文一个实例。同一上下文内同一时刻至多一轮同步；
/// 多个上下文之间没有互斥，同一条目可能被投递多次（至少一次语义）
pub struct SyncCoordinator {
    queue: MutationQueue,
    fetcher: Arc<dyn Fetcher>,
    connectivity: Connectivity,
    config: SyncConfig,
    /// 用于解析队列中的相对 URL
    base_url: Url,
    background: Option<Arc<dyn BackgroundSync>>,
    is_processing: AtomicBool,
    status: RwLock<SyncStatus>,
    broadcaster: StatusBroadcaster,
}

impl SyncCoordinator {
    pub fn new(
        queue: MutationQueue,
        fetcher: Arc<dyn Fetcher>,
        connectivity: Connectivity,
        config: SyncConfig,
        base_url: Url,
    ) -> Self {
        Self {
            queue,
            fetcher,
            connectivity,
            config,
            base_url,
            background: None,
            is_processing: AtomicBool::new(false),
            status: RwLock::new(SyncStatus::default()),
            broadcaster: StatusBroadcaster::new(),
        }
    }

    /// 接入平台的后台唤醒能力；不接入时只依赖定时器
    pub fn with_background_sync(mut self, background: Arc<dyn BackgroundSync>) -> Self {
        self.background = Some(background);
        self
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::Acquire)
    }

    /// 当前状态快照
    ///
    /// `is_processing` 始终取自单飞标志，同步被中途取消时也不会停留在 true
    pub async fn status(&self) -> SyncStatus {
        let mut status = self.status.read().await.clone();
        status.is_processing = self.is_processing();
        status
    }

    /// 订阅状态
    ///
    /// 回调在订阅时立即收到一次当前状态，之后每轮同步后都会收到
    pub async fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let status = self.recompute_pending().await;
        callback(&status);
        self.broadcaster.subscribe(callback)
    }

    async fn recompute_pending(&self) -> SyncStatus {
        let pending = self.queue.count().await;
        let mut status = self.status.write().await;
        match pending {
            Ok(n) => {
                status.pending_count = n;
                GLOBAL_METRICS.set_queue_pending(n);
            }
            Err(e) => warn!("failed to count pending mutations: {}", e),
        }
        status.is_processing = self.is_processing();
        status.clone()
    }

    async fn publish(&self) {
        let status = self.status().await;
        self.broadcaster.publish(&status);
    }

    /// 入队写操作，使用配置中的默认重试上限
    pub async fn queue_mutation(
        self: &Arc<Self>,
        url: &str,
        method: &str,
        body: Option<String>,
        headers: BTreeMap<String, String>,
    ) -> Result<String> {
        let max_retries = self.config.max_retries;
        self.queue_mutation_with_retries(url, method, body, headers, max_retries)
            .await
    }

    /// 入队写操作
    ///
    /// 入队失败（存储错误）直接返回给调用方；入队成功后申请后台唤醒，
    /// 在线时按配置在后台立即触发一轮同步
    #[instrument(skip(self, body, headers), level = "debug")]
    pub async fn queue_mutation_with_retries(
        self: &Arc<Self>,
        url: &str,
        method: &str,
        body: Option<String>,
        headers: BTreeMap<String, String>,
        max_retries: u32,
    ) -> Result<String> {
        let id = self
            .queue
            .enqueue(url, method, body, headers, max_retries)
            .await?;
        self.recompute_pending().await;
        self.publish().await;
        self.request_background_wake().await;

        if self.config.drain_on_enqueue && self.connectivity.is_online() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.sync_now().await;
            });
        }
        Ok(id)
    }

    async fn request_background_wake(&self) {
        match &self.background {
            Some(background) => {
                if let Err(e) = background.register(&self.config.background_tag).await {
                    warn!(
                        "background wake registration failed, falling back to timer: {}",
                        e
                    );
                }
            }
            None => debug!("no background wake capability, relying on timer"),
        }
    }

    /// 立即执行一轮同步
    ///
    /// 离线或已有同步在进行时直接返回；从不向调用方抛出错误，结果只体现在状态和队列中
    #[instrument(skip(self), level = "info")]
    pub async fn sync_now(&self) -> DrainReport {
        if !self.connectivity.is_online() {
            debug!("offline, sync skipped");
            return DrainReport::skipped(SkipReason::Offline);
        }
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sync already in progress, trigger ignored");
            return DrainReport::skipped(SkipReason::InProgress);
        }
        let guard = ProcessingGuard(&self.is_processing);
        self.publish().await;

        let started = Instant::now();
        let report = self.drain().await;
        GLOBAL_METRICS.record_drain_pass(started.elapsed().as_secs_f64());

        self.recompute_pending().await;
        {
            let mut status = self.status.write().await;
            status.last_sync_time = Some(Utc::now());
            status.last_error = report.last_error.clone();
        }
        drop(guard);
        self.publish().await;

        info!(
            "sync finished: attempted={}, delivered={}, rejected={}, retried={}, dropped={}",
            report.attempted, report.delivered, report.rejected, report.retried, report.dropped
        );
        report
    }

    /// 对开始时的队列快照做一次 FIFO 遍历，单个条目的失败不会中断遍历
    async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        let items = match self.queue.list().await {
            Ok(items) => items,
            Err(e) => {
                error!("failed to read mutation queue: {}", e);
                report.last_error = Some(e.to_string());
                return report;
            }
        };

        for item in items {
            if let Err(e) = self.process_item(&item, &mut report).await {
                error!("failed to update queue item {}: {}", item.id, e);
                report.last_error = Some(e.to_string());
            }
        }
        report
    }

    async fn process_item(&self, item: &SyncQueueItem, report: &mut DrainReport) -> Result<()> {
        report.attempted += 1;
        match self.deliver(item).await {
            Ok(()) => {
                self.queue.remove(&item.id).await?;
                report.delivered += 1;
                GLOBAL_METRICS.record_drain_outcome("delivered");
                debug!("delivered {} {}", item.method, item.url);
            }
            Err(e) if !e.is_retryable() => {
                self.queue.remove(&item.id).await?;
                report.rejected += 1;
                GLOBAL_METRICS.record_drain_outcome("rejected");
                warn!("dropping {} {}: {}", item.method, item.url, e);
                report.last_error = Some(format!("{} {} rejected: {}", item.method, item.url, e));
            }
            Err(e) if item.is_exhausted() => {
                self.queue.remove(&item.id).await?;
                report.dropped += 1;
                GLOBAL_METRICS.record_drain_outcome("dropped");
                warn!(
                    "giving up on {} {} after {} retries: {}",
                    item.method, item.url, item.retries, e
                );
                report.last_error = Some(format!(
                    "{} {} dropped after {} retries: {}",
                    item.method, item.url, item.retries, e
                ));
            }
            Err(e) => {
                let retries = self.queue.increment_retries(&item.id).await?;
                report.retried += 1;
                GLOBAL_METRICS.record_drain_outcome("retried");
                match retries {
                    Some(n) => debug!(
                        "{} {} failed, retries now {}/{}",
                        item.method, item.url, n, item.max_retries
                    ),
                    None => debug!("{} {} already removed or exhausted", item.method, item.url),
                }
                report.last_error = Some(format!("{} {} failed: {}", item.method, item.url, e));
            }
        }
        Ok(())
    }

    fn build_request(&self, item: &SyncQueueItem) -> Result<Request> {
        let method = Method::from_bytes(item.method.as_bytes())
            .map_err(|_| SyncError::InvalidRecord(format!("invalid method '{}'", item.method)))?;
        let url = self.base_url.join(&item.url).map_err(|e| {
            SyncError::InvalidRecord(format!("invalid url '{}': {}", item.url, e))
        })?;

        let mut request = Request::new(method, url);
        for (name, value) in &item.headers {
            request = request.with_header(name, value);
        }
        if let Some(body) = &item.body {
            request = request.with_body(Bytes::from(body.clone()));
        }
        Ok(request)
    }

    /// 投递单个条目，非 2xx 响应转换为错误
    async fn deliver(&self, item: &SyncQueueItem) -> Result<()> {
        let request = self.build_request(item)?;
        let resp = self.fetcher.fetch(&request).await?;
        if resp.is_malformed() {
            return Err(SyncError::MalformedResponse {
                status: resp.status,
                url: request.url.to_string(),
            });
        }
        if !resp.is_success() {
            return Err(SyncError::Http {
                status: resp.status,
                url: request.url.to_string(),
            });
        }
        Ok(())
    }

    /// 启动所有触发源：恢复在线、在线时的定时器、后台转发的同步请求
    ///
    /// 运行到 `shutdown` 被取消为止
    pub fn start(self: &Arc<Self>, bus: MessageBus, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_triggers(bus, shutdown).await })
    }

    async fn run_triggers(&self, bus: MessageBus, shutdown: CancellationToken) {
        let mut online_rx = self.connectivity.subscribe();
        let mut messages = bus.subscribe_clients();
        let period = Duration::from_secs(self.config.interval_secs);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "sync coordinator started (interval={}s)",
            self.config.interval_secs
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("sync coordinator stopped");
                    break;
                }
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online {
                        info!("connectivity restored, draining queue");
                        self.sync_now().await;
                    }
                }
                _ = ticker.tick() => {
                    if self.connectivity.is_online() {
                        self.sync_now().await;
                    }
                }
                msg = messages.recv() => match msg {
                    Ok(ClientMessage::SyncRequested { tag }) => {
                        debug!("sync requested by background context (tag={:?})", tag);
                        self.sync_now().await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("missed {} background messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::http::{MockFetcher, Response};
    use crate::store::DurableStore;

    async fn coordinator(fetcher: MockFetcher) -> SyncCoordinator {
        let store = Arc::new(DurableStore::open(&StoreConfig::default()).await.unwrap());
        SyncCoordinator::new(
            MutationQueue::new(store),
            Arc::new(fetcher),
            Connectivity::new(true),
            SyncConfig {
                drain_on_enqueue: false,
                ..Default::default()
            },
            Url::parse("https://app.example.com").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_client_error_dropped_without_retry() {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(Response::new(422, "bad")));
        let coordinator = coordinator(fetcher).await;
        coordinator
            .queue()
            .enqueue("/api/orders", "POST", Some("{}".into()), BTreeMap::new(), 3)
            .await
            .unwrap();

        let report = coordinator.sync_now().await;
        assert_eq!(report.rejected, 1);
        assert_eq!(report.retried, 0);
        assert_eq!(coordinator.queue().count().await.unwrap(), 0);
        assert!(coordinator.status().await.last_error.is_some());
    }

    #[tokio::test]
    async fn test_relative_url_resolved_against_base() {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|req| {
                req.url.as_str() == "https://app.example.com/api/tasks/9"
                    && req.method == Method::PATCH
                    && req.headers.get("content-type").map(String::as_str) == Some("application/json")
            })
            .times(1)
            .returning(|_| Ok(Response::new(204, "")));
        let coordinator = coordinator(fetcher).await;
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        coordinator
            .queue()
            .enqueue("/api/tasks/9", "patch", Some("{}".into()), headers, 3)
            .await
            .unwrap();

        let report = coordinator.sync_now().await;
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_retried() {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|_| Err(SyncError::NetworkUnavailable("connection reset".into())));
        let coordinator = coordinator(fetcher).await;
        let id = coordinator
            .queue()
            .enqueue("/api/orders", "POST", None, BTreeMap::new(), 3)
            .await
            .unwrap();

        let report = coordinator.sync_now().await;
        assert_eq!(report.retried, 1);
        let item = coordinator.queue().get(&id).await.unwrap().unwrap();
        assert_eq!(item.retries, 1);
    }

    #[tokio::test]
    async fn test_offline_skips() {
        let fetcher = MockFetcher::new();
        let coordinator = coordinator(fetcher).await;
        coordinator.connectivity().set_online(false);
        let report = coordinator.sync_now().await;
        assert_eq!(report.skipped, Some(SkipReason::Offline));
        assert!(coordinator.status().await.last_sync_time.is_none());
    }
}
