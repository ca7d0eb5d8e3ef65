use async_trait::async_trait;

use crate::core::error::Result;

/// 页面抓取接口
///
/// 单次请求，不带重试；超时由实现方负责。
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// GET 并返回响应正文
    async fn get_text(&self, url: &str) -> Result<String>;
}
