//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了离线数据层的运行时指标。

use lazy_static::lazy_static;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// 指标收集器
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 路由结果计数
    /// key: "strategy:outcome"
    pub router_outcomes: Arc<Mutex<BTreeMap<String, u64>>>,
    /// 队列投递结果计数
    /// key: "outcome"
    pub drain_outcomes: Arc<Mutex<BTreeMap<String, u64>>>,
    /// 队列中待投递条目数
    pub queue_pending: Arc<Mutex<usize>>,
    /// 完成的同步轮次 (次数, 累计耗时秒)
    pub drain_passes: Arc<Mutex<(u64, f64)>>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Metrics {
    /// 记录一次路由结果
    pub fn record_route(&self, strategy: &str, outcome: &str) {
        let key = format!("{}:{}", strategy, outcome);
        *lock(&self.router_outcomes).entry(key).or_insert(0) += 1;
    }

    /// 记录一次队列投递结果
    pub fn record_drain_outcome(&self, outcome: &str) {
        *lock(&self.drain_outcomes)
            .entry(outcome.to_string())
            .or_insert(0) += 1;
    }

    /// 记录一轮同步耗时
    pub fn record_drain_pass(&self, duration_secs: f64) {
        let mut passes = lock(&self.drain_passes);
        passes.0 += 1;
        passes.1 += duration_secs;
    }

    pub fn set_queue_pending(&self, pending: usize) {
        *lock(&self.queue_pending) = pending;
    }
}

/// 获取指标字符串（Prometheus 文本格式）
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let mut output = String::new();

    for (k, v) in lock(&metrics.router_outcomes).iter() {
        if let Some((strategy, outcome)) = k.split_once(':') {
            output.push_str(&format!(
                "oxsync_router_requests_total{{strategy=\"{}\", outcome=\"{}\"}} {}\n",
                strategy, outcome, v
            ));
        }
    }
    for (k, v) in lock(&metrics.drain_outcomes).iter() {
        output.push_str(&format!(
            "oxsync_drain_items_total{{outcome=\"{}\"}} {}\n",
            k, v
        ));
    }
    output.push_str(&format!(
        "oxsync_queue_pending {}\n",
        *lock(&metrics.queue_pending)
    ));
    let (count, total) = *lock(&metrics.drain_passes);
    output.push_str(&format!("oxsync_drain_duration_seconds_sum {}\n", total));
    output.push_str(&format!("oxsync_drain_duration_seconds_count {}\n", count));
    output
}
