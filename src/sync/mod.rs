//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了离线写操作的同步机制，包括变更队列、连接状态、后台唤醒和同步协调器。

pub mod background;
pub mod connectivity;
pub mod coordinator;
pub mod queue;
pub mod status;

pub use background::{BackgroundSync, BackgroundWakeRegistry};
pub use connectivity::Connectivity;
pub use coordinator::{DrainReport, SkipReason, SyncCoordinator};
pub use queue::{MutationQueue, SyncQueueItem};
pub use status::{StatusBroadcaster, Subscription, SyncStatus};
