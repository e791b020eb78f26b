//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了响应缓存分区命令的实现。

use crate::cache::ResponseCache;
use crate::cli::{confirm, CacheArgs, CacheSubcommand};
use crate::context::ExecutionContext;
use anyhow::{Context, Result};

pub async fn execute(ctx: &ExecutionContext, args: &CacheArgs) -> Result<()> {
    let store = ctx.store().await.context("Failed to open store")?;
    let cache = ResponseCache::new(store);
    let config = &ctx.config().cache;

    match &args.command {
        CacheSubcommand::Partitions => {
            let partitions = cache.partitions().await?;
            if partitions.is_empty() {
                println!("No cache partitions.");
                return Ok(());
            }
            for name in partitions {
                let entries = cache.entries(&name).await?.len();
                let marker = if config.is_current_partition(&name) {
                    "current"
                } else if config.owns_partition(&name) {
                    "stale"
                } else {
                    "foreign"
                };
                println!("{:<32} {:>6} entries  [{}]", name, entries, marker);
            }
        }
        CacheSubcommand::Clear { partition, yes } => {
            let targets: Vec<String> = match partition {
                Some(p) => vec![p.clone()],
                None => cache
                    .partitions()
                    .await?
                    .into_iter()
                    .filter(|p| config.owns_partition(p))
                    .collect(),
            };
            if targets.is_empty() {
                println!("Nothing to clear.");
                return Ok(());
            }
            if !yes && !confirm(&format!("Delete partitions {}?", targets.join(", ")))? {
                println!("Operation cancelled.");
                return Ok(());
            }
            let mut total = 0;
            for name in &targets {
                total += cache
                    .clear(name)
                    .await
                    .with_context(|| format!("Failed to clear partition '{}'", name))?;
            }
            println!("✅ Deleted {} entries from {} partitions.", total, targets.len());
        }
    }

    Ok(())
}
