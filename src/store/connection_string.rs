//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了连接字符串的解析与规范化。
//!
//! 持久化存储只支持 SQLite，本模块负责把各种写法统一为 sqlx 可接受的格式，
//! 并在打开文件数据库前确保目录存在。

use crate::error::{Result, SyncError};
use std::path::Path;

/// SQLite 连接字符串解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConnectionString {
    /// 文件路径，内存数据库时为 None
    pub file_path: Option<String>,
    /// 是否为内存数据库
    pub is_memory: bool,
    /// 连接参数
    pub params: Vec<(String, String)>,
}

impl ParsedConnectionString {
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s.strip_prefix("sqlite:").ok_or_else(|| {
            SyncError::ConfigError(format!(
                "Unsupported connection string '{}': only sqlite is supported",
                s
            ))
        })?;

        let (path, query) = match rest.split_once('?') {
            Some((p, q)) => (p, q),
            None => (rest, ""),
        };
        let params = extract_params(query);

        if path == ":memory:" || path.is_empty() {
            return Ok(Self {
                file_path: None,
                is_memory: true,
                params,
            });
        }

        let file_path = if let Some(p) = path.strip_prefix("///") {
            format!("/{}", p)
        } else if let Some(p) = path.strip_prefix("//") {
            format!("/{}", p)
        } else if path.starts_with('/') || path.starts_with("./") || path.starts_with("../") {
            path.to_string()
        } else {
            format!("./{}", path)
        };

        Ok(Self {
            file_path: Some(file_path),
            is_memory: false,
            params,
        })
    }
}

/// 从查询字符串提取参数
fn extract_params(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// 规范化连接字符串
///
/// - 内存数据库: `sqlite::memory:`
/// - 文件数据库: `sqlite:<path>?mode=rwc`，文件不存在时自动创建
pub fn normalize_connection_string(s: &str) -> Result<String> {
    let parsed = ParsedConnectionString::parse(s)?;
    let mut params = parsed.params;

    if parsed.is_memory {
        if params.is_empty() {
            return Ok("sqlite::memory:".to_string());
        }
        let joined: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        return Ok(format!("sqlite::memory:?{}", joined.join("&")));
    }

    if !params.iter().any(|(k, _)| k == "mode") {
        params.push(("mode".to_string(), "rwc".to_string()));
    }
    let joined: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    let path = parsed.file_path.unwrap_or_default();
    Ok(format!("sqlite:{}?{}", path, joined.join("&")))
}

/// 确保文件数据库所在目录存在
pub fn ensure_database_directory(connection_string: &str) -> Result<()> {
    let parsed = ParsedConnectionString::parse(connection_string)?;
    if let Some(path) = parsed.file_path {
        if let Some(parent) = Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SyncError::Storage(format!("无法创建数据库目录 {}: {}", parent.display(), e))
                })?;
            }
        }
    }
    Ok(())
}
