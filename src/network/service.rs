use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;

use crate::core::error::{EngineError, Result};
use crate::interfaces::PageFetcher;
use crate::network::middleware::{SessionMiddleware, TraceMiddleware};
use crate::network::session::Session;

/// HTTP 服务
///
/// 单次请求、固定超时，不做重试；重试策略由调用方通过 [`RetryPolicy`] 显式组合。
///
/// [`RetryPolicy`]: crate::network::retry::RetryPolicy
#[derive(Clone)]
pub struct HttpService {
    client: ClientWithMiddleware,
}

impl HttpService {
    pub fn new(session: Arc<Session>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(EngineError::Network)?;

        let client = ClientBuilder::new(client)
            .with(SessionMiddleware::new(session))
            .with(TraceMiddleware)
            .build();

        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(EngineError::Middleware)?;
        resp.error_for_status().map_err(EngineError::Network)
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        let resp = self.get(url).await?;
        resp.text().await.map_err(EngineError::Network)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let text = self.get_text(url).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl PageFetcher for HttpService {
    async fn get_text(&self, url: &str) -> Result<String> {
        HttpService::get_text(self, url).await
    }
}
