//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了指标查询命令的实现。

use crate::context::ExecutionContext;
use crate::metrics::{get_metrics_string, GLOBAL_METRICS};
use crate::sync::MutationQueue;
use anyhow::{Context, Result};

pub async fn execute(ctx: &ExecutionContext) -> Result<()> {
    let store = ctx.store().await.context("Failed to open store")?;
    let pending = MutationQueue::new(store).count().await?;
    GLOBAL_METRICS.set_queue_pending(pending);

    print!("{}", get_metrics_string());
    Ok(())
}
