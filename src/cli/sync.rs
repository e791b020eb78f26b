//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了手动同步命令的实现。

use crate::cli::SyncArgs;
use crate::context::ExecutionContext;
use crate::http::ReqwestFetcher;
use crate::sync::{Connectivity, MutationQueue, SyncCoordinator};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub async fn execute(ctx: &ExecutionContext, args: &SyncArgs) -> Result<()> {
    let store = ctx.store().await.context("Failed to open store")?;
    let config = ctx.config();
    let origin = Url::parse(&config.cache.origin)
        .with_context(|| format!("Invalid origin '{}'", config.cache.origin))?;
    let fetcher = ReqwestFetcher::new(Duration::from_secs(args.timeout))?;

    let coordinator = SyncCoordinator::new(
        MutationQueue::new(store),
        Arc::new(fetcher),
        Connectivity::new(true),
        config.sync.clone(),
        origin,
    );

    let report = coordinator.sync_now().await;
    let status = coordinator.status().await;

    println!("=== Sync against {} ===\n", config.cache.origin);
    println!("Attempted: {}", report.attempted);
    println!("Delivered: {}", report.delivered);
    println!("Rejected:  {}", report.rejected);
    println!("Retrying:  {}", report.retried);
    println!("Dropped:   {}", report.dropped);
    println!("Pending:   {}", status.pending_count);
    if let Some(err) = status.last_error {
        println!("\nLast error: {}", err);
    }

    Ok(())
}
