use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::error::Result;
use crate::sites::PatternSet;

/// 视频流嗅探接口
///
/// 渲染页面并观察其发出的网络请求，返回第一个命中模式的地址。
/// 超时未命中返回 `Ok(None)`；无论以何种方式退出，渲染上下文都必须被销毁。
#[async_trait]
pub trait StreamSniffer: Send + Sync {
    async fn sniff(
        &self,
        url: &str,
        patterns: &PatternSet,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<String>>;
}
