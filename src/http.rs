//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了与传输无关的请求/响应模型，以及网络访问的抽象。

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// 离线标记响应头
pub const OFFLINE_HEADER: &str = "x-oxsync-offline";

/// 出站请求
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    /// 头部名称统一为小写
    pub headers: BTreeMap<String, String>,
    pub body: Option<Bytes>,
    /// 是否为整页导航
    pub navigate: bool,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: BTreeMap::new(),
            body: None,
            navigate: false,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// 整页导航请求
    pub fn navigate(url: Url) -> Self {
        let mut req = Self::get(url);
        req.navigate = true;
        req
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

mod body_base64 {
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// 响应快照
///
/// 可序列化，以便整体存入响应缓存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(with = "body_base64")]
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// 状态码不在合法范围内
    pub fn is_malformed(&self) -> bool {
        !(100..=599).contains(&self.status)
    }

    /// 是否为本层合成的离线响应
    pub fn is_offline_indicator(&self) -> bool {
        self.header(OFFLINE_HEADER).is_some()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// 合成的离线 JSON 响应
    ///
    /// 结构化负载，调用方可据此显示友好的离线提示
    pub fn offline_json(url: &str) -> Self {
        let payload = serde_json::json!({
            "error": "offline",
            "offline": true,
            "message": "You are offline and no cached data is available.",
            "url": url,
        });
        Response::new(503, payload.to_string())
            .with_header("content-type", "application/json")
            .with_header(OFFLINE_HEADER, "1")
    }

    /// 合成的最小离线文档
    pub fn offline_document() -> Self {
        let html = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
                    <body><h1>You are offline</h1><p>Reconnect to continue.</p></body></html>";
        Response::new(503, html)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_header(OFFLINE_HEADER, "1")
    }
}

/// 网络访问抽象
///
/// 传输失败（未收到任何响应）返回 `SyncError::NetworkUnavailable`，
/// 收到的任何 HTTP 状态都作为 `Ok(Response)` 返回
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// 基于 reqwest 的网络实现
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    #[instrument(skip(self, request), level = "debug", fields(method = %request.method, url = %request.url))]
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| SyncError::NetworkUnavailable(e.to_string()))?;

        let status = resp.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| SyncError::NetworkUnavailable(format!("Failed to read body: {}", e)))?;
        debug!("fetch completed: status={}, len={}", status, body.len());

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_snapshot_serde() {
        let resp = Response::new(200, vec![0u8, 159, 146, 150]).with_header("ETag", "\"abc\"");
        let json = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resp);
        assert_eq!(back.header("etag"), Some("\"abc\""));
    }

    #[test]
    fn test_offline_indicator() {
        let resp = Response::offline_json("/api/orders");
        assert!(resp.is_offline_indicator());
        let payload: serde_json::Value = resp.json().unwrap();
        assert_eq!(payload["offline"], true);
        assert_eq!(payload["error"], "offline");
    }

    #[test]
    fn test_status_classes() {
        assert!(Response::new(204, "").is_success());
        assert!(Response::new(422, "").is_client_error());
        assert!(Response::new(503, "").is_server_error());
        assert!(Response::new(42, "").is_malformed());
    }
}
