//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了构建在持久化存储之上的缓存视图。

pub mod entity;
pub mod response;

pub use entity::{CachedEntity, EntityCache, InventoryItem, Order, Task};
pub use response::{CachedResponse, ResponseCache};
