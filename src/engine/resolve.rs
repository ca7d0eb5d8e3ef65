//! 视频流解析
//!
//! 互斥任务：新的解析请求会先取消并断开上一个，旧任务迟到的结果不会被投递。
//! 嗅探失败或超时一律报告 `None`。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::error::Result;
use crate::core::event::EngineEvent;
use crate::interfaces::StreamSniffer;
use crate::sites::SourceConfig;
use crate::utils::strip_redirect_wrapper;

use super::dispatcher::Dispatcher;
use super::task::{TaskContext, TaskHandle, TaskKind};

/// 一次解析请求
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: String,
    /// 站点查找结果，未知站点携带原因
    pub source: std::result::Result<Arc<SourceConfig>, String>,
    pub timeout: Duration,
}

/// 提交 (并取代上一个) 视频流解析任务
pub fn resolve_stream(
    dispatcher: &Dispatcher,
    sniffer: &Arc<dyn StreamSniffer>,
    request: StreamRequest,
) -> Result<TaskHandle> {
    let sniffer = sniffer.clone();
    dispatcher.submit_exclusive(TaskKind::StreamResolve, move |ctx| {
        run_resolve(ctx, sniffer, request)
    })
}

async fn run_resolve(
    ctx: TaskContext,
    sniffer: Arc<dyn StreamSniffer>,
    request: StreamRequest,
) -> Result<()> {
    ctx.checkpoint()?;

    let source = match request.source {
        Ok(source) => source,
        Err(reason) => {
            warn!("无法解析 {}: {}", request.url, reason);
            ctx.deliver(EngineEvent::StreamResolved(None));
            return Ok(());
        }
    };

    debug!("[{}] 嗅探 {} (超时 {:?})", source.id, request.url, request.timeout);
    let found = match sniffer
        .sniff(&request.url, &source.patterns, request.timeout, ctx.token())
        .await
    {
        Ok(found) => found.map(|raw| strip_redirect_wrapper(&raw).to_string()),
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            warn!("[{}] 嗅探失败: {}", source.id, e);
            None
        }
    };

    match &found {
        Some(url) => info!("[{}] 视频流: {}", source.id, url),
        None => info!("[{}] 未捕获到视频流", source.id),
    }
    ctx.deliver(EngineEvent::StreamResolved(found));
    Ok(())
}
