//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存路由器，运行在后台上下文中拦截出站请求并按路由表选择缓存策略。
//!
//! 路由器保证每个被拦截的请求都有应答：网络响应、缓存响应或合成的离线响应，
//! 缓存层自身的故障只记录日志，不会影响响应的交付。

pub mod lifecycle;
pub mod route;

pub use lifecycle::{InstallReport, LifecycleState};
pub use route::{RouteMatcher, RouteRule, RouteTable, Strategy};

use crate::cache::ResponseCache;
use crate::config::CacheConfig;
use crate::error::{Result, SyncError};
use crate::http::{Fetcher, Request, Response};
use crate::messaging::MessageBus;
use crate::metrics::GLOBAL_METRICS;
use reqwest::Method;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, warn};
use url::Url;

/// 缓存路由器
pub struct CacheRouter {
    config: CacheConfig,
    origin: Url,
    routes: RouteTable,
    cache: ResponseCache,
    fetcher: Arc<dyn Fetcher>,
    /// 缓存优先策略的后台刷新任务
    refreshes: TaskTracker,
    lifecycle: RwLock<LifecycleState>,
    bus: MessageBus,
}

impl CacheRouter {
    pub fn new(
        config: CacheConfig,
        cache: ResponseCache,
        fetcher: Arc<dyn Fetcher>,
        bus: MessageBus,
    ) -> Result<Self> {
        let origin = Url::parse(&config.origin).map_err(|e| {
            SyncError::ConfigError(format!("invalid origin '{}': {}", config.origin, e))
        })?;
        let routes = RouteTable::from_config(&config)?;
        Ok(Self {
            config,
            origin,
            routes,
            cache,
            fetcher,
            refreshes: TaskTracker::new(),
            lifecycle: RwLock::new(LifecycleState::Installing),
            bus,
        })
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// 只拦截同源 GET 请求
    pub fn should_intercept(&self, request: &Request) -> bool {
        request.method == Method::GET && request.url.origin() == self.origin.origin()
    }

    /// 处理一个出站请求
    ///
    /// 未被拦截的请求原样交给网络；被拦截的请求按首个命中规则的策略处理
    #[instrument(skip(self, request), level = "debug", fields(method = %request.method, url = %request.url))]
    pub async fn handle(&self, request: &Request) -> Result<Response> {
        if !self.should_intercept(request) {
            return self.fetcher.fetch(request).await;
        }

        let rule = self.routes.classify(request);
        debug!("route '{}' -> {}", rule.name, rule.strategy);
        match rule.strategy {
            Strategy::NetworkFirst => Ok(self.network_first(request, &rule.partition).await),
            Strategy::CacheFirst => self.cache_first(request, &rule.partition).await,
            Strategy::NetworkFirstShell => Ok(self.network_first_shell(request, &rule.partition).await),
        }
    }

    async fn network_first(&self, request: &Request, partition: &str) -> Response {
        let strategy = Strategy::NetworkFirst.as_str();
        let url = request.url.as_str();

        // 服务端错误时保留原响应，无缓存可回退时返回它
        let server_error = match self.fetcher.fetch(request).await {
            Ok(resp) if resp.is_success() => {
                self.store(partition, url, &resp).await;
                GLOBAL_METRICS.record_route(strategy, "network");
                return resp;
            }
            // 4xx 等非服务端错误原样返回，不写缓存
            Ok(resp) if !resp.is_server_error() && !resp.is_malformed() => {
                GLOBAL_METRICS.record_route(strategy, "passthrough");
                return resp;
            }
            Ok(resp) => Some(resp),
            Err(e) => {
                debug!("network failed for {}: {}", url, e);
                None
            }
        };

        if let Some(cached) = self.lookup(partition, url).await {
            GLOBAL_METRICS.record_route(strategy, "cache_fallback");
            return cached;
        }

        match server_error {
            Some(resp) => {
                GLOBAL_METRICS.record_route(strategy, "server_error");
                resp
            }
            None => {
                GLOBAL_METRICS.record_route(strategy, "offline");
                Response::offline_json(url)
            }
        }
    }

    async fn cache_first(&self, request: &Request, partition: &str) -> Result<Response> {
        let strategy = Strategy::CacheFirst.as_str();
        let url = request.url.as_str();

        if let Some(cached) = self.lookup(partition, url).await {
            self.spawn_refresh(partition.to_string(), request.clone());
            GLOBAL_METRICS.record_route(strategy, "cache_hit");
            return Ok(cached);
        }

        let resp = match self.fetcher.fetch(request).await {
            Ok(resp) => resp,
            Err(e) => {
                GLOBAL_METRICS.record_route(strategy, "error");
                return Err(e);
            }
        };
        if resp.is_success() {
            self.store(partition, url, &resp).await;
        }
        GLOBAL_METRICS.record_route(strategy, "network");
        Ok(resp)
    }

    async fn network_first_shell(&self, request: &Request, partition: &str) -> Response {
        let strategy = Strategy::NetworkFirstShell.as_str();

        match self.fetcher.fetch(request).await {
            Ok(resp) if resp.is_success() => {
                if self.is_shell_resource(request) {
                    self.store(partition, request.url.as_str(), &resp).await;
                }
                GLOBAL_METRICS.record_route(strategy, "network");
                return resp;
            }
            Ok(resp) if !resp.is_server_error() && !resp.is_malformed() => {
                GLOBAL_METRICS.record_route(strategy, "passthrough");
                return resp;
            }
            Ok(resp) => debug!("navigation got status {}, using shell", resp.status),
            Err(e) => debug!("navigation failed, using shell: {}", e),
        }

        if let Some(shell_url) = self.shell_url() {
            if let Some(shell) = self.lookup(partition, shell_url.as_str()).await {
                GLOBAL_METRICS.record_route(strategy, "shell");
                return shell;
            }
        }
        GLOBAL_METRICS.record_route(strategy, "offline");
        Response::offline_document()
    }

    fn is_shell_resource(&self, request: &Request) -> bool {
        let path = request.url.path();
        self.config.shell_resources.iter().any(|r| r == path)
    }

    fn shell_url(&self) -> Option<Url> {
        self.origin.join(&self.config.shell_document).ok()
    }

    /// 读缓存；读失败按未命中处理
    async fn lookup(&self, partition: &str, url: &str) -> Option<Response> {
        match self.cache.get(partition, url).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("cache read failed for {}: {}", url, e);
                None
            }
        }
    }

    /// 写缓存；写失败只记录日志
    async fn store(&self, partition: &str, url: &str, resp: &Response) {
        if let Err(e) = self.cache.put(partition, url, resp, resp.header("etag")).await {
            warn!("cache write failed for {}: {}", url, e);
        }
    }

    fn spawn_refresh(&self, partition: String, request: Request) {
        let cache = self.cache.clone();
        let fetcher = Arc::clone(&self.fetcher);
        self.refreshes.spawn(async move {
            let url = request.url.as_str();
            match fetcher.fetch(&request).await {
                Ok(resp) if resp.is_success() => {
                    if let Err(e) = cache.put(&partition, url, &resp, resp.header("etag")).await {
                        warn!("background refresh could not update cache for {}: {}", url, e);
                    }
                }
                Ok(resp) => debug!("background refresh for {} returned {}", url, resp.status),
                Err(e) => debug!("background refresh for {} failed: {}", url, e),
            }
        });
    }

    /// 正在进行的后台刷新数
    pub fn pending_refreshes(&self) -> usize {
        self.refreshes.len()
    }

    /// 等待所有已发起的后台刷新完成
    pub async fn wait_for_refreshes(&self) {
        self.refreshes.close();
        self.refreshes.wait().await;
        self.refreshes.reopen();
    }
}
