//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了路由表：按顺序匹配的 (谓词, 策略) 列表，首个命中生效。

use crate::config::CacheConfig;
use crate::error::{Result, SyncError};
use crate::http::Request;
use regex::Regex;
use std::fmt;

/// 缓存策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// 网络优先，失败回退缓存
    NetworkFirst,
    /// 缓存优先，命中时后台刷新
    CacheFirst,
    /// 网络优先，失败回退应用外壳
    NetworkFirstShell,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::NetworkFirst => "network_first",
            Strategy::CacheFirst => "cache_first",
            Strategy::NetworkFirstShell => "network_first_shell",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 路由谓词
#[derive(Debug, Clone)]
pub enum RouteMatcher {
    /// 对 URL 路径做正则匹配
    Path(Regex),
    /// 整页导航请求
    Navigation,
    /// 任意请求
    Any,
}

impl RouteMatcher {
    pub fn matches(&self, request: &Request) -> bool {
        match self {
            RouteMatcher::Path(re) => re.is_match(request.url.path()),
            RouteMatcher::Navigation => request.navigate,
            RouteMatcher::Any => true,
        }
    }
}

/// 单条路由规则
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub name: String,
    pub matcher: RouteMatcher,
    pub strategy: Strategy,
    /// 写入的缓存分区
    pub partition: String,
}

impl RouteRule {
    pub fn matches(&self, request: &Request) -> bool {
        self.matcher.matches(request)
    }
}

/// 路由表
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
    fallback: RouteRule,
}

impl RouteTable {
    /// 按配置构建路由表
    ///
    /// 顺序：API 路径、静态资源扩展名、整页导航；都不命中时网络优先写入通用分区
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let api_partition = config.api_partition();
        let general_partition = config.general_partition();
        let mut rules = Vec::new();

        for (i, pattern) in config.api_patterns.iter().enumerate() {
            let re = Regex::new(pattern).map_err(|e| {
                SyncError::ConfigError(format!("invalid api pattern '{}': {}", pattern, e))
            })?;
            rules.push(RouteRule {
                name: format!("api-{}", i),
                matcher: RouteMatcher::Path(re),
                strategy: Strategy::NetworkFirst,
                partition: api_partition.clone(),
            });
        }

        if !config.static_extensions.is_empty() {
            let alternation = config
                .static_extensions
                .iter()
                .map(|ext| regex::escape(ext.trim_start_matches('.')))
                .collect::<Vec<_>>()
                .join("|");
            let re = Regex::new(&format!(r"(?i)\.(?:{})$", alternation))
                .map_err(|e| SyncError::ConfigError(format!("invalid static extensions: {}", e)))?;
            rules.push(RouteRule {
                name: "static".to_string(),
                matcher: RouteMatcher::Path(re),
                strategy: Strategy::CacheFirst,
                partition: general_partition.clone(),
            });
        }

        rules.push(RouteRule {
            name: "navigation".to_string(),
            matcher: RouteMatcher::Navigation,
            strategy: Strategy::NetworkFirstShell,
            partition: general_partition.clone(),
        });

        Ok(Self {
            rules,
            fallback: RouteRule {
                name: "default".to_string(),
                matcher: RouteMatcher::Any,
                strategy: Strategy::NetworkFirst,
                partition: general_partition,
            },
        })
    }

    /// 首个命中的规则
    pub fn classify(&self, request: &Request) -> &RouteRule {
        self.rules
            .iter()
            .find(|rule| rule.matches(request))
            .unwrap_or(&self.fallback)
    }

    /// 有序规则列表，不含兜底规则
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn fallback(&self) -> &RouteRule {
        &self.fallback
    }
}
