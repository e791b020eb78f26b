//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了过期清理命令的实现。

use crate::cache::{EntityCache, InventoryItem, Order, ResponseCache, Task};
use crate::cli::EvictArgs;
use crate::context::ExecutionContext;
use anyhow::{Context, Result};
use std::time::Duration;

pub async fn execute(ctx: &ExecutionContext, args: &EvictArgs) -> Result<()> {
    let store = ctx.store().await.context("Failed to open store")?;
    let eviction = &ctx.config().eviction;

    let entity_age = Duration::from_secs(args.entities_max_age.unwrap_or(eviction.entity_max_age_secs));
    let response_age =
        Duration::from_secs(args.responses_max_age.unwrap_or(eviction.response_max_age_secs));

    let orders = EntityCache::<Order>::new(store.clone())
        .evict_older_than(entity_age)
        .await?;
    let tasks = EntityCache::<Task>::new(store.clone())
        .evict_older_than(entity_age)
        .await?;
    let inventory = EntityCache::<InventoryItem>::new(store.clone())
        .evict_older_than(entity_age)
        .await?;
    let responses = ResponseCache::new(store)
        .evict_all_older_than(response_age)
        .await?;

    println!("Evicted:");
    println!("  Orders:    {}", orders);
    println!("  Tasks:     {}", tasks);
    println!("  Inventory: {}", inventory);
    println!("  Responses: {}", responses);

    Ok(())
}
