//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了测试的通用工具函数和设置。

use async_trait::async_trait;
use oxsync::config::{CacheConfig, StoreConfig};
use oxsync::http::{Fetcher, Request, Response};
use oxsync::store::DurableStore;
use oxsync::SyncError;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub const ORIGIN: &str = "https://app.example.com";

pub fn setup_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(EnvFilter::new("debug"))
            .try_init()
            .ok();
    });
}

type Responder = Box<dyn FnMut(&Request) -> Response + Send>;

/// 可编排的模拟网络
///
/// 离线时所有请求返回 `NetworkUnavailable`，在线时由 responder 生成响应
pub struct MockNetwork {
    online: AtomicBool,
    delay: Mutex<Option<Duration>>,
    responder: Mutex<Responder>,
    calls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl MockNetwork {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: FnMut(&Request) -> Response + Send + 'static,
    {
        Arc::new(Self {
            online: AtomicBool::new(true),
            delay: Mutex::new(None),
            responder: Mutex::new(Box::new(responder)),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// 对所有请求返回相同状态码
    pub fn with_status(status: u16) -> Arc<Self> {
        Self::new(move |_| Response::new(status, ""))
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&Request) -> Response + Send + 'static,
    {
        *self.responder.lock().unwrap() = Box::new(responder);
    }

    /// 已发出的请求，格式为 `METHOD url`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for MockNetwork {
    async fn fetch(&self, request: &Request) -> oxsync::Result<Response> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", request.method, request.url));

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(SyncError::NetworkUnavailable("mock network is offline".into()));
        }
        let mut responder = self.responder.lock().unwrap();
        Ok(responder(request))
    }
}

/// 内存存储
#[allow(dead_code)]
pub async fn memory_store() -> Arc<DurableStore> {
    Arc::new(DurableStore::open(&StoreConfig::default()).await.unwrap())
}

/// 文件存储的配置
#[allow(dead_code)]
pub fn file_store_config(dir: &Path) -> StoreConfig {
    StoreConfig {
        connection_string: format!("sqlite:{}", dir.join("offline.db").display()),
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn cache_config() -> CacheConfig {
    CacheConfig {
        origin: ORIGIN.to_string(),
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn url(path: &str) -> url::Url {
    url::Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// 轮询直到条件成立，超时则失败
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
