//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了变更队列命令的实现。

use crate::cli::{confirm, QueueArgs, QueueSubcommand};
use crate::context::ExecutionContext;
use crate::sync::MutationQueue;
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};

pub async fn execute(ctx: &ExecutionContext, args: &QueueArgs) -> Result<()> {
    let store = ctx.store().await.context("Failed to open store")?;
    let queue = MutationQueue::new(store);

    match &args.command {
        QueueSubcommand::List => {
            let items = queue.list().await?;
            if items.is_empty() {
                println!("Queue is empty.");
                return Ok(());
            }
            for item in items {
                let queued_at = Utc
                    .timestamp_millis_opt(item.timestamp)
                    .single()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| item.timestamp.to_string());
                println!(
                    "{}  {:<6} {}  retries={}/{}  queued={}",
                    item.id, item.method, item.url, item.retries, item.max_retries, queued_at
                );
            }
        }
        QueueSubcommand::Clear { yes } => {
            let pending = queue.count().await?;
            if pending == 0 {
                println!("Queue is empty.");
                return Ok(());
            }
            if !yes && !confirm(&format!("Discard {} queued mutations?", pending))? {
                println!("Operation cancelled.");
                return Ok(());
            }
            let removed = queue.clear().await?;
            println!("✅ Removed {} queued mutations.", removed);
        }
    }

    Ok(())
}
