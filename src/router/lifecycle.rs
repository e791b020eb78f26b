//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了后台上下文的生命周期：安装时预取应用外壳，激活时清理旧版本分区并接管页面。

use super::CacheRouter;
use crate::error::{Result, SyncError};
use crate::http::Request;
use crate::messaging::ClientMessage;
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

/// 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Installing,
    /// 安装完成，等待激活
    Installed,
    Activating,
    Activated,
}

/// 安装结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: Vec<String>,
    /// 预取失败的资源，不影响安装
    pub failed: Vec<String>,
}

impl CacheRouter {
    pub async fn lifecycle_state(&self) -> LifecycleState {
        *self.lifecycle.read().await
    }

    async fn transition(&self, next: LifecycleState) {
        let mut state = self.lifecycle.write().await;
        info!("lifecycle {:?} -> {:?}", *state, next);
        *state = next;
    }

    /// 安装：并发预取外壳资源写入通用分区
    ///
    /// 单个资源失败只记录警告，安装总会完成
    #[instrument(skip(self), level = "info")]
    pub async fn install(&self) -> InstallReport {
        self.transition(LifecycleState::Installing).await;
        let partition = self.config.general_partition();

        let results = join_all(
            self.config
                .shell_resources
                .iter()
                .map(|path| self.precache(&partition, path)),
        )
        .await;

        let mut report = InstallReport::default();
        for (path, result) in self.config.shell_resources.iter().zip(results) {
            match result {
                Ok(()) => report.cached.push(path.clone()),
                Err(e) => {
                    warn!("failed to precache shell resource {}: {}", path, e);
                    report.failed.push(path.clone());
                }
            }
        }

        self.transition(LifecycleState::Installed).await;
        info!(
            "install finished: {} cached, {} failed",
            report.cached.len(),
            report.failed.len()
        );
        report
    }

    async fn precache(&self, partition: &str, path: &str) -> Result<()> {
        let url = self
            .origin
            .join(path)
            .map_err(|e| SyncError::ConfigError(format!("invalid shell resource '{}': {}", path, e)))?;
        let resp = self.fetcher.fetch(&Request::get(url.clone())).await?;
        if !resp.is_success() {
            return Err(SyncError::Http {
                status: resp.status,
                url: url.to_string(),
            });
        }
        self.cache
            .put(partition, url.as_str(), &resp, resp.header("etag"))
            .await
    }

    /// 激活：删除本系统命名下所有非当前版本的分区，然后接管所有页面
    ///
    /// 返回被删除的分区名
    #[instrument(skip(self), level = "info")]
    pub async fn activate(&self) -> Vec<String> {
        self.transition(LifecycleState::Activating).await;

        let mut removed = Vec::new();
        match self.cache.partitions().await {
            Ok(partitions) => {
                for name in partitions {
                    if !self.config.owns_partition(&name) || self.config.is_current_partition(&name) {
                        continue;
                    }
                    match self.cache.clear(&name).await {
                        Ok(n) => {
                            info!("deleted stale partition {} ({} entries)", name, n);
                            removed.push(name);
                        }
                        Err(e) => warn!("failed to delete stale partition {}: {}", name, e),
                    }
                }
            }
            Err(e) => warn!("failed to list cache partitions: {}", e),
        }

        self.transition(LifecycleState::Activated).await;
        self.claim_clients();
        removed
    }

    /// 接管所有打开的页面
    fn claim_clients(&self) {
        let notified = self.bus.post_to_clients(ClientMessage::ControllerChanged {
            version: self.config.version.clone(),
        });
        info!("claimed {} clients for version {}", notified, self.config.version);
    }

    /// 删除本系统命名下的全部分区，返回删除的条目数
    pub async fn clear_all_partitions(&self) -> Result<u64> {
        let mut total = 0;
        for name in self.cache.partitions().await? {
            if self.config.owns_partition(&name) {
                total += self.cache.clear(&name).await?;
            }
        }
        info!("cleared all cache partitions ({} entries)", total);
        Ok(total)
    }

    /// 处理来自页面的消息
    pub async fn handle_message(&self, msg: &ClientMessage) -> Result<()> {
        match msg {
            ClientMessage::SkipWaiting => {
                if self.lifecycle_state().await == LifecycleState::Installed {
                    self.activate().await;
                } else {
                    debug!("SKIP_WAITING ignored, nothing is waiting");
                }
            }
            ClientMessage::ClearCache => {
                self.clear_all_partitions().await?;
            }
            other => debug!("ignoring client-bound message {:?}", other),
        }
        Ok(())
    }
}
