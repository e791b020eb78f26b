//! oxsync - 离线优先的数据层
//!
//! 提供持久化存储、按策略路由的响应缓存、持久化变更队列和同步协调器，
//! 让应用在断网时继续读取数据并排队写操作，恢复连接后自动补发。

#![doc(html_root_url = "https://docs.rs/oxsync/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod messaging;
pub mod metrics;
pub mod router;
pub mod store;
pub mod sync;
pub mod telemetry;

// Re-export commonly used items
pub use cache::{EntityCache, ResponseCache};
pub use config::Config;
pub use context::{BackgroundContext, ExecutionContext, ForegroundContext};
pub use error::{Result, SyncError};
pub use http::{Fetcher, Request, Response};
pub use messaging::{ClientMessage, MessageBus};
pub use router::CacheRouter;
pub use store::DurableStore;
pub use sync::{MutationQueue, SyncCoordinator, SyncStatus};

/// oxsync 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
