//! 多源搜索聚合 (Multi-Source Search Aggregator)
//!
//! 每个站点一个独立任务，互不影响：单站点的任何错误都只会降级为该站点的 failed。

use std::sync::Arc;

use indexmap::IndexSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::error::{EngineError, ErrorKind, Result};
use crate::core::event::EngineEvent;
use crate::core::model::SiteResult;
use crate::interfaces::PageFetcher;
use crate::sites::extract::{extract_candidates, extract_routes};
use crate::sites::{SiteRegistry, SourceConfig, similarity};

use super::dispatcher::Dispatcher;
use super::task::{TaskContext, TaskHandle, TaskKind};

/// 一次搜索调用的全部站点任务
#[derive(Debug, Clone)]
pub struct SearchHandle {
    keyword: String,
    tasks: Vec<(String, TaskHandle)>,
}

impl SearchHandle {
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// 请求的站点标识 (按提交顺序)
    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 取消仍未完成的站点，被取消的站点不会产生任何结果
    pub fn cancel(&self) {
        for (_, handle) in &self.tasks {
            handle.cancel();
        }
    }
}

/// 向每个站点派发一个搜索任务
pub fn search<S: AsRef<str>>(
    dispatcher: &Dispatcher,
    registry: &SiteRegistry,
    fetcher: &Arc<dyn PageFetcher>,
    keyword: &str,
    source_ids: &[S],
) -> Result<SearchHandle> {
    let keyword = keyword.trim().to_string();
    // 重复的站点标识只派发一次，保持首次出现的顺序
    let source_ids: IndexSet<String> = source_ids
        .iter()
        .map(|id| id.as_ref().to_string())
        .collect();
    info!("搜索 \"{}\"，站点数: {}", keyword, source_ids.len());

    let mut tasks = Vec::with_capacity(source_ids.len());
    for id in source_ids {
        let handle = match registry.get(&id) {
            Ok(source) => {
                let fetcher = fetcher.clone();
                let keyword = keyword.clone();
                dispatcher.submit(TaskKind::SiteSearch, move |ctx| {
                    search_source(ctx, source, fetcher, keyword)
                })?
            }
            Err(e) => {
                warn!("{}", e);
                let failed = SiteResult::failed(&id);
                dispatcher.submit(TaskKind::SiteSearch, move |ctx| async move {
                    ctx.deliver(EngineEvent::SiteResult(failed));
                    Ok(())
                })?
            }
        };

        tasks.push((id, handle));
    }

    Ok(SearchHandle { keyword, tasks })
}

/// 单站点任务：出错降级为 failed，取消则不投递
async fn search_source(
    ctx: TaskContext,
    source: Arc<SourceConfig>,
    fetcher: Arc<dyn PageFetcher>,
    keyword: String,
) -> Result<()> {
    let result = match resolve_best(&ctx, &source, fetcher.as_ref(), &keyword).await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            warn!("[{}] 搜索失败: {}", source.id, e);
            SiteResult::failed(&source.id)
        }
    };

    if result.is_success() {
        info!("[{}] 命中", source.id);
    }
    ctx.deliver(EngineEvent::SiteResult(result));
    Ok(())
}

async fn resolve_best(
    ctx: &TaskContext,
    source: &SourceConfig,
    fetcher: &dyn PageFetcher,
    keyword: &str,
) -> Result<SiteResult> {
    ctx.checkpoint()?;
    let search_url = source.search_url(keyword);
    debug!("[{}] 搜索页: {}", source.id, search_url);

    let body = fetcher
        .get_text(&search_url)
        .await
        .map_err(|e| tag(source, e))?;

    let candidates = extract_candidates(&body, &source.selectors, &source.base_url);
    let Some(best) = similarity::best(keyword, &source.id, candidates) else {
        debug!("[{}] 无搜索结果", source.id);
        return Ok(SiteResult::failed(&source.id));
    };
    debug!(
        "[{}] 最佳候选: {} ({:.3}) {}",
        source.id, best.title, best.similarity, best.link
    );

    ctx.checkpoint()?;
    let detail_url = Url::parse(&best.link)
        .map_err(|e| EngineError::source_failed(&source.id, format!("{}: {}", best.link, e)))?;
    let detail = fetcher
        .get_text(detail_url.as_str())
        .await
        .map_err(|e| tag(source, e))?;

    let routes = extract_routes(&detail, &source.selectors, &detail_url);
    Ok(SiteResult::from_routes(best, routes))
}

/// 归入单站点错误，取消与超时保持原样
fn tag(source: &SourceConfig, e: EngineError) -> EngineError {
    match e.kind() {
        ErrorKind::Cancelled | ErrorKind::Timeout => e,
        ErrorKind::Config | ErrorKind::Source => EngineError::source_failed(&source.id, e),
    }
}
