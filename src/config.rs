//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了离线数据层的配置结构和解析逻辑。

use crate::error::{Result, SyncError};
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub config_version: Option<u32>,
    /// 持久化存储配置
    pub store: StoreConfig,
    /// 响应缓存与路由配置
    pub cache: CacheConfig,
    /// 同步协调器配置
    pub sync: SyncConfig,
    /// 过期清理配置
    pub eviction: EvictionConfig,
}

/// 持久化存储配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct StoreConfig {
    /// 连接字符串，例如 `sqlite:./offline.db` 或 `sqlite::memory:`
    pub connection_string: String,
    /// 连接超时时间（秒）
    pub connect_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connection_string: "sqlite::memory:".to_string(),
            connect_timeout_secs: 30,
        }
    }
}

/// 响应缓存与请求路由配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CacheConfig {
    /// 缓存分区命名前缀
    pub prefix: String,
    /// 当前缓存版本，激活时会删除同前缀下的其他版本分区
    pub version: String,
    /// 应用的源（scheme + host + port），只拦截同源请求
    pub origin: String,
    /// 安装阶段预取的应用外壳资源
    pub shell_resources: Vec<String>,
    /// 导航请求离线时回退的外壳文档
    pub shell_document: String,
    /// API 路径正则
    pub api_patterns: Vec<String>,
    /// 静态资源扩展名
    pub static_extensions: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "app".to_string(),
            version: "v1".to_string(),
            origin: "http://localhost".to_string(),
            shell_resources: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
            ],
            shell_document: "/index.html".to_string(),
            api_patterns: vec!["^/api/".to_string()],
            static_extensions: [
                "js", "css", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff", "woff2", "ttf",
                "webp",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl CacheConfig {
    /// 通用流量分区名
    pub fn general_partition(&self) -> String {
        format!("{}-{}", self.prefix, self.version)
    }

    /// API 流量分区名
    pub fn api_partition(&self) -> String {
        format!("{}-api-{}", self.prefix, self.version)
    }

    /// 判断分区是否属于本系统（按命名约定）
    pub fn owns_partition(&self, name: &str) -> bool {
        name.starts_with(&format!("{}-", self.prefix))
    }

    /// 判断分区是否属于当前版本
    pub fn is_current_partition(&self, name: &str) -> bool {
        name == self.general_partition() || name == self.api_partition()
    }
}

/// 同步协调器配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SyncConfig {
    /// 定时同步间隔（秒）
    pub interval_secs: u64,
    /// 入队时默认的最大重试次数
    pub max_retries: u32,
    /// 后台唤醒标签
    pub background_tag: String,
    /// 入队后如在线是否立即触发同步
    pub drain_on_enqueue: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            max_retries: 3,
            background_tag: "sync-mutations".to_string(),
            drain_on_enqueue: true,
        }
    }
}

/// 过期清理配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct EvictionConfig {
    /// 实体缓存最大存活时间（秒）
    pub entity_max_age_secs: u64,
    /// 响应缓存最大存活时间（秒）
    pub response_max_age_secs: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            entity_max_age_secs: 7 * 24 * 3600,
            response_max_age_secs: 24 * 3600,
        }
    }
}

impl Config {
    /// 从 TOML 字符串解析配置
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(|e| SyncError::ConfigError(e.to_string()))?;
        config.validate().map_err(SyncError::ConfigError)?;
        Ok(config)
    }

    /// 从文件加载配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有值都在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = self.config_version {
            if version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        if self.store.connection_string.trim().is_empty() {
            return Err("store.connection_string cannot be empty".to_string());
        }

        if self.cache.prefix.is_empty() {
            return Err("cache.prefix cannot be empty".to_string());
        }
        if self.cache.version.is_empty() {
            return Err("cache.version cannot be empty".to_string());
        }
        if let Err(e) = url::Url::parse(&self.cache.origin) {
            return Err(format!("cache.origin '{}' is invalid: {}", self.cache.origin, e));
        }
        for pattern in &self.cache.api_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(format!("cache.api_patterns '{}' is invalid: {}", pattern, e));
            }
        }
        if !self.cache.shell_document.starts_with('/') {
            return Err("cache.shell_document must be an absolute path".to_string());
        }

        if self.sync.interval_secs == 0 || self.sync.interval_secs > 3600 {
            return Err("sync.interval_secs must be between 1 and 3600 seconds".to_string());
        }
        if self.sync.max_retries == 0 {
            return Err("sync.max_retries must be greater than zero".to_string());
        }
        if self.sync.background_tag.is_empty() {
            return Err("sync.background_tag cannot be empty".to_string());
        }

        if self.eviction.entity_max_age_secs == 0 || self.eviction.response_max_age_secs == 0 {
            return Err("eviction max ages cannot be zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_partition_names() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.general_partition(), "app-v1");
        assert_eq!(cfg.api_partition(), "app-api-v1");
        assert!(cfg.owns_partition("app-v0"));
        assert!(!cfg.owns_partition("other-v1"));
        assert!(!cfg.is_current_partition("app-v0"));
        assert!(cfg.is_current_partition("app-api-v1"));
    }

    #[test]
    fn test_parse_toml() {
        let cfg = Config::from_toml_str(
            r#"
            [cache]
            origin = "https://shop.example.com"
            version = "v7"

            [sync]
            interval_secs = 10
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cache.version, "v7");
        assert_eq!(cfg.sync.max_retries, 5);
        assert_eq!(cfg.store.connection_string, "sqlite::memory:");
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.sync.max_retries = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.cache.api_patterns = vec!["(".to_string()];
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.config_version = Some(CONFIG_VERSION + 1);
        assert!(cfg.validate().is_err());
    }
}
