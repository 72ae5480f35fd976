//! 后端客户端抽象
//!
//! 本核心不理解后端字段语义，只依赖一个 `{method, path, body} ->
//! {status, data}` 形态的调用接口。`HttpBackendClient` 是基于 reqwest
//! 的具体适配器；测试中用内存实现替代。

use async_trait::async_trait;
use serde_json::Value;

use workitem_core::config::BackendConfig;
use workitem_core::error::{Result, WorkItemError};

/// HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// 后端请求
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
}

impl BackendRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Patch,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Delete,
            path: path.into(),
            body: None,
        }
    }
}

/// 后端响应
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: u16,
    pub data: Value,
}

/// 后端客户端接口
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// 执行一次后端调用；非 2xx 响应以分类后的错误返回
    async fn execute(&self, request: BackendRequest) -> Result<BackendResponse>;
}

/// 基于 reqwest 的后端客户端
pub struct HttpBackendClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout_seconds: u64,
}

impl HttpBackendClient {
    pub fn new(config: &BackendConfig, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(std::time::Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|err| WorkItemError::Config {
                message: format!("failed to build http client: {err}"),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            timeout_seconds: config.request_timeout_seconds,
        })
    }

    fn map_transport_error(&self, err: reqwest::Error) -> WorkItemError {
        if err.is_timeout() {
            WorkItemError::Timeout {
                seconds: self.timeout_seconds,
            }
        } else {
            // 连接被拒绝 / 重置 / DNS 失败等都归入网络类（可重试）
            WorkItemError::Network {
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn execute(&self, request: BackendRequest) -> Result<BackendResponse> {
        let url = format!("{}/{}", self.base_url, request.path.trim_start_matches('/'));
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| self.map_transport_error(err))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let message = response.text().await.unwrap_or_default();
            return Err(WorkItemError::from_status(status, message));
        }

        let data = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok(BackendResponse { status, data })
    }
}
