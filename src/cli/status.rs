//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了状态查询命令的实现。

use crate::cache::{EntityCache, InventoryItem, Order, ResponseCache, Task};
use crate::cli::StatusArgs;
use crate::context::ExecutionContext;
use crate::sync::MutationQueue;
use anyhow::{Context, Result};
use serde_json::json;

pub async fn execute(ctx: &ExecutionContext, args: &StatusArgs) -> Result<()> {
    let store = ctx.store().await.context("Failed to open store")?;
    let queue = MutationQueue::new(store.clone());
    let responses = ResponseCache::new(store.clone());

    let schema_version = store.schema_version().await?;
    let items = queue.list().await?;
    let partitions = responses.partitions().await?;
    let orders = EntityCache::<Order>::new(store.clone()).count().await?;
    let tasks = EntityCache::<Task>::new(store.clone()).count().await?;
    let inventory = EntityCache::<InventoryItem>::new(store).count().await?;

    if args.json {
        let mut out = json!({
            "schemaVersion": schema_version,
            "pendingCount": items.len(),
            "partitions": partitions,
            "entities": { "orders": orders, "tasks": tasks, "inventory": inventory },
        });
        if args.verbose {
            out["items"] = serde_json::to_value(&items)?;
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("=== Offline Store Status ===\n");
    println!("Schema Version: {}", schema_version);
    println!("Pending:        {}", items.len());
    println!("Partitions:     {}", partitions.len());
    println!(
        "Entities:       {} orders, {} tasks, {} inventory",
        orders, tasks, inventory
    );

    if args.verbose && !items.is_empty() {
        println!("\nQueue:");
        for item in &items {
            println!(
                "  {} {} {} (retries {}/{})",
                item.id, item.method, item.url, item.retries, item.max_retries
            );
        }
    }

    Ok(())
}
