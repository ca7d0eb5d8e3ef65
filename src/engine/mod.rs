//! 调度引擎 (Engine Facade)
//!
//! 交互层唯一的入口：搜索、视频流解析、订阅轮询与关闭。
//! 所有结果都经由构造时传入的 [`EventSender`] 推送。

pub mod dispatcher;
pub mod poll;
pub mod resolve;
pub mod search;
pub mod task;

use std::sync::Arc;
use std::time::Duration;

use crate::core::config::AppConfig;
use crate::core::error::{EngineError, Result};
use crate::core::event::EventSender;
use crate::core::model::EpisodeSelection;
use crate::interfaces::{FeedSource, PageFetcher, StreamSniffer};
use crate::network::{ChromeSniffer, HttpService, LogStore, RetryPolicy, Session, TimelineFeed};
use crate::sites::SiteRegistry;

pub use dispatcher::Dispatcher;
pub use poll::{PollState, PollWorker};
pub use resolve::StreamRequest;
pub use search::SearchHandle;
pub use task::{TaskContext, TaskHandle, TaskId, TaskKind};

/// 调度引擎
pub struct Engine {
    config: AppConfig,
    registry: Arc<SiteRegistry>,
    dispatcher: Arc<Dispatcher>,
    fetcher: Arc<dyn PageFetcher>,
    sniffer: Arc<dyn StreamSniffer>,
    poller: Option<Arc<PollWorker>>,
}

#[bon::bon]
impl Engine {
    /// 装配引擎并启动工作协程 (须在 Tokio 运行时内调用)
    #[builder]
    pub fn new(
        #[builder(default)] config: AppConfig,
        registry: SiteRegistry,
        fetcher: Arc<dyn PageFetcher>,
        sniffer: Arc<dyn StreamSniffer>,
        feed: Option<Arc<dyn FeedSource>>,
        events: EventSender,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(config.engine.workers, events));
        let poller = feed.map(|feed| {
            Arc::new(PollWorker::new(
                feed,
                dispatcher.clone(),
                config.poll.last_marker.clone(),
            ))
        });

        Self {
            config,
            registry: Arc::new(registry),
            dispatcher,
            fetcher,
            sniffer,
            poller,
        }
    }
}

impl Engine {
    /// 按配置装配真实的网络协作者
    ///
    /// 未配置 `poll.user_id` 时不启用轮询。
    pub fn from_config(config: AppConfig, events: EventSender) -> Result<Self> {
        let registry = SiteRegistry::load_file(&config.engine.sources_path)?;

        let session = Arc::new(Session::browser_like());
        let http = HttpService::new(session, config.engine.request_timeout())?;
        let sniffer = ChromeSniffer::new(config.browser.clone());

        let feed: Option<Arc<dyn FeedSource>> = if config.poll.user_id.trim().is_empty() {
            None
        } else {
            let retry = RetryPolicy::from(config.retry);
            let feed = TimelineFeed::new(config.poll.clone(), retry, Arc::new(LogStore))?;
            Some(Arc::new(feed))
        };

        Ok(Self::builder()
            .config(config)
            .registry(registry)
            .fetcher(Arc::new(http))
            .sniffer(Arc::new(sniffer))
            .maybe_feed(feed)
            .events(events)
            .build())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// 多源搜索，每个请求的站点恰好产生一个 `SiteResult` (被取消者除外)
    pub fn search<S: AsRef<str>>(&self, keyword: &str, source_ids: &[S]) -> Result<SearchHandle> {
        search::search(
            &self.dispatcher,
            &self.registry,
            &self.fetcher,
            keyword,
            source_ids,
        )
    }

    /// 在全部已注册站点上搜索
    pub fn search_all(&self, keyword: &str) -> Result<SearchHandle> {
        self.search(keyword, &self.registry.ids())
    }

    /// 解析剧集页的视频流，取代任何仍在进行的解析
    pub fn resolve_stream(
        &self,
        episode_url: &str,
        source_id: &str,
        timeout: Option<Duration>,
    ) -> Result<TaskHandle> {
        let request = StreamRequest {
            url: episode_url.to_string(),
            source: self.registry.get(source_id).map_err(|e| e.to_string()),
            timeout: timeout.unwrap_or_else(|| self.config.engine.sniff_timeout()),
        };
        resolve::resolve_stream(&self.dispatcher, &self.sniffer, request)
    }

    /// 解析已选定剧集的视频流
    pub fn play(&self, selection: &EpisodeSelection, timeout: Option<Duration>) -> Result<TaskHandle> {
        self.resolve_stream(&selection.episode().link, selection.source_id(), timeout)
    }

    /// 取消当前的视频流解析，返回之前是否有解析在进行
    pub fn cancel_stream_resolve(&self) -> bool {
        self.dispatcher.cancel_current(TaskKind::StreamResolve)
    }

    fn poller(&self) -> Result<&Arc<PollWorker>> {
        self.poller
            .as_ref()
            .ok_or_else(|| EngineError::config("polling requires a feed source"))
    }

    pub fn poll_worker(&self) -> Option<&Arc<PollWorker>> {
        self.poller.as_ref()
    }

    /// 立即触发一次轮询
    pub fn poll_now(&self) -> Result<Option<TaskHandle>> {
        Ok(self.poller()?.tick())
    }

    /// 启动定时轮询，`interval` 缺省取配置值
    pub fn start_polling(&self, interval: Option<Duration>) -> Result<()> {
        let poller = self.poller()?;
        poller.start_polling(
            self.config.poll.initial_delay(),
            interval.unwrap_or_else(|| self.config.poll.interval()),
        );
        Ok(())
    }

    pub fn stop_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|p| p.stop_polling())
    }

    /// 按配置的等待时长关闭
    pub async fn shutdown(&self) -> bool {
        self.shutdown_with(self.config.engine.drain_timeout()).await
    }

    /// 停止轮询并关闭调度器，超时未退出的任务结果被丢弃
    pub async fn shutdown_with(&self, drain_timeout: Duration) -> bool {
        self.stop_polling();
        self.dispatcher.shutdown(drain_timeout).await
    }
}

/// 未经 `shutdown` 直接释放时，停止定时器并取消全部在途任务
impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_polling();
        self.dispatcher.root_token().cancel();
    }
}
