use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::error::Result;

/// 轮询的订阅源
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// 轻量的新鲜度标记，没有可用标记时返回 `None`
    async fn latest_marker(&self) -> Result<Option<String>>;

    /// 标记变化后执行的重量级同步
    async fn synchronize(&self, cancel: &CancellationToken) -> Result<()>;
}

/// 收藏记录持久化 (外部协作者)
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn store(&self, entries: Vec<Value>) -> Result<()>;
}
